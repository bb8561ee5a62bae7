// cxxgraph: cached C/C++ symbol indexing

pub mod ast;
pub mod cli;
pub mod compdb;
pub mod config;
pub mod error;
pub mod index;
pub mod indexer;

#[cfg(test)]
mod testing;
