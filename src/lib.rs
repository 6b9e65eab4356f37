//! ninjafy core library.
//!
//! Converts the resolved build graph of an SCons-style build into a
//! self-regenerating Ninja file. The [`graph`] module reads the graph,
//! [`export`] lowers it to a file model and [`ninja_gen`] renders that model.
//! [`helpers`] holds the small programs the generated file calls back into.

pub mod cli;
pub mod export;
pub mod graph;
pub mod helpers;
pub mod ninja_gen;
pub mod probe;
pub mod runner;
