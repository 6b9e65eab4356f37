//! Build graph fixtures.
//!
//! A [`GraphFixture`] is a temporary project directory holding fake compiler
//! and Ninja executables, an `SConstruct` file and a graph document whose
//! `tools` table pins the fake programs. Tests add nodes and then run the
//! exporter with `-C` pointing at the directory.

use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::fake_executable;

/// File name the exporter reads by default.
pub const GRAPH_FILE: &str = "build-graph.json";

/// Temporary project with a graph document under construction.
#[derive(Debug)]
pub struct GraphFixture {
    dir: TempDir,
    doc: Value,
}

impl GraphFixture {
    /// Create the project directory with a GCC toolchain and no nodes.
    ///
    /// # Panics
    ///
    /// Panics when the directory or its files cannot be created.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let bin = dir.path().join("bin");
        fs::create_dir_all(&bin).expect("bin dir");
        let cxx = fake_executable(&bin, "g++", "exit 0");
        let cc = fake_executable(&bin, "gcc", "exit 0");
        fake_executable(&bin, "ninja", "exit 0");
        fs::write(dir.path().join("SConstruct"), "# build\n").expect("SConstruct");
        let doc = json!({
            "graph_version": "1.0.0",
            "toolchain": "gcc",
            "target_os": "linux",
            "env": {
                "CXX": "g++",
                "CC": "gcc",
                "LINK": "$CXX",
                "CXXFLAGS": "-O2",
            },
            "tools": { "g++": cxx, "gcc": cc },
            "upstream": {
                "program": "python3 buildscripts/scons.py",
                "args": ["VARIANT_DIR=ninja"],
                "config_files": ["SConstruct"],
            },
            "nodes": [],
        });
        Self { dir, doc }
    }

    /// Project directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Fake Ninja executable inside the project.
    pub fn ninja(&self) -> PathBuf {
        self.dir.path().join("bin/ninja")
    }

    /// Fake C++ compiler inside the project.
    pub fn compiler(&self) -> PathBuf {
        self.dir.path().join("bin/g++")
    }

    /// Append a node.
    #[must_use]
    pub fn node(mut self, node: Value) -> Self {
        if let Some(nodes) = self.doc["nodes"].as_array_mut() {
            nodes.push(node);
        }
        self
    }

    /// Replace a top-level field of the document.
    #[must_use]
    pub fn field(mut self, key: &str, value: Value) -> Self {
        self.doc[key] = value;
        self
    }

    /// Write the document to [`GRAPH_FILE`] and return its path.
    ///
    /// # Panics
    ///
    /// Panics when the file cannot be written.
    pub fn write(&self) -> PathBuf {
        let path = self.dir.path().join(GRAPH_FILE);
        fs::write(&path, self.doc.to_string()).expect("write graph");
        path
    }
}

impl Default for GraphFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// A C++ compile of `source` into `target`.
pub fn compile(target: &str, source: &str) -> Value {
    json!({
        "targets": [target],
        "sources": [source],
        "action": { "kind": "command", "command": "$CXX -o $TARGET -c $CXXFLAGS $SOURCES" },
    })
}

/// A link of `objects` into `target`.
pub fn link(target: &str, objects: &[&str]) -> Value {
    json!({
        "targets": [target],
        "sources": objects,
        "action": { "kind": "command", "command": "$LINK -o $TARGET $SOURCES" },
    })
}

/// An install of `source` to `target`.
pub fn install(target: &str, source: &str) -> Value {
    json!({
        "targets": [target],
        "sources": [source],
        "action": { "kind": "install" },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_a_parseable_document() {
        let fixture = GraphFixture::new()
            .node(compile("a.o", "a.cpp"))
            .field("defaults", json!(["a.o"]));
        let text = fs::read_to_string(fixture.write()).expect("read graph");
        let doc: Value = serde_json::from_str(&text).expect("json");
        assert_eq!(doc["nodes"].as_array().map(Vec::len), Some(1));
        assert_eq!(doc["defaults"], json!(["a.o"]));
        assert!(fixture.compiler().is_file());
    }
}
