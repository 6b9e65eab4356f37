//! Tests for the whole-file export pipeline.

use super::*;
use crate::graph::GraphDocument;
use camino::Utf8Path;
use rstest::{fixture, rstest};
use serde_json::{Value, json};

/// Locator with a fixed program table.
struct Pinned(BTreeMap<&'static str, &'static str>);

impl ToolLocator for Pinned {
    fn locate(&self, program: &str) -> Option<Utf8PathBuf> {
        self.0.get(program).map(Utf8PathBuf::from)
    }
}

#[fixture]
fn locator() -> Pinned {
    Pinned(BTreeMap::from([("g++", "/opt/gcc/bin/g++"), ("gcc", "/opt/gcc/bin/gcc")]))
}

fn graph(nodes: Value) -> GraphDocument {
    graph_with(nodes, json!({}))
}

fn graph_with(nodes: Value, extra: Value) -> GraphDocument {
    let mut doc = json!({
        "graph_version": "1.0.0",
        "toolchain": "gcc",
        "target_os": "linux",
        "env": { "CXX": "g++", "CC": "gcc", "LINK": "$CXX", "CXXFLAGS": "-O2" },
        "upstream": { "program": "scons", "args": ["--jobs=8"] },
        "nodes": nodes,
    });
    if let (Some(target), Value::Object(fields)) = (doc.as_object_mut(), extra) {
        target.extend(fields);
    }
    GraphDocument::from_str_named(&doc.to_string(), Utf8Path::new("graph.json"))
        .expect("valid graph")
}

fn options() -> ExportOptions {
    ExportOptions::new("build.ninja", "/opt/ninjafy/bin/ninjafy")
}

fn run(doc: &GraphDocument, locator: &Pinned) -> Result<Export, ExportError> {
    export(doc, &options(), locator, &LibdepsBinding)
}

fn find<'e>(export: &'e Export, output: &str) -> &'e Edge {
    export
        .file
        .edges
        .iter()
        .find(|edge| edge.outputs.iter().any(|out| out == output))
        .unwrap_or_else(|| panic!("no edge for {output}"))
}

fn cxx(target: &str, source: &str) -> Value {
    json!({
        "targets": [target],
        "sources": [source],
        "action": { "kind": "command", "command": "$CXX -o $TARGET -c $CXXFLAGS $SOURCES" }
    })
}

#[rstest]
fn compiles_links_and_installs(locator: Pinned) {
    let doc = graph(json!([
        cxx("build/opt/app_test.o", "src/app_test.cpp"),
        {
            "targets": ["build/opt/app_test"],
            "sources": ["build/opt/app_test.o"],
            "action": { "kind": "command", "command": "$LINK -o $TARGET $SOURCES" }
        },
        {
            "targets": ["build/unittests/app_test"],
            "sources": ["build/opt/app_test"],
            "action": { "kind": "install" }
        }
    ]));
    let result = run(&doc, &locator).expect("export");

    let compile = find(&result, "build/opt/app_test.o");
    assert_eq!(compile.rule, "CXX");
    assert_eq!(compile.inputs, vec![String::from("src/app_test.cpp")]);
    assert_eq!(compile.order_only, vec![String::from(GENERATED_HEADERS)]);
    assert!(compile.variables.is_empty());
    assert!(compile.implicit.contains(&String::from("/opt/gcc/bin/g++")));

    let install = find(&result, "build/unittests/app_test");
    assert_eq!(install.rule, "INSTALL");
    assert!(install.variables.is_empty());

    let shortcut = find(&result, "+app_test");
    assert_eq!(shortcut.rule, "RUN_TEST");
    assert_eq!(shortcut.inputs, vec![String::from("build/opt/app_test")]);

    assert!(result.file.generated_headers.is_empty());
    assert_eq!(
        result.file.vars.get("CXXFLAGS").map(String::as_str),
        Some("-O2")
    );
    let helper = result.file.vars.get("HELPER").expect("HELPER bound");
    assert!(helper.contains("/opt/ninjafy/bin/ninjafy"));
    assert!(helper.ends_with(" helper"));
    assert_eq!(result.file.upstream_args, "\"--jobs=8\"");
    assert_eq!(result.file.regenerator.depfile, "build.ninja.deps");
    assert!(result.timestamps.is_some());

    for name in ["CXX", "LINK", "INSTALL"] {
        let declared = result.file.rules.iter().filter(|rule| rule.name == name).count();
        assert_eq!(declared, 1, "rule {name} declared {declared} times");
    }
    let link = find(&result, "build/opt/app_test");
    assert_eq!(link.rule, "LINK");
    let text = crate::ninja_gen::generate(&result.file);
    assert_eq!(text.matches("rule CXX\n").count(), 1);
    assert_eq!(text.matches("rule LINK\n").count(), 1);
    assert_eq!(text.matches("rule INSTALL\n").count(), 1);
    assert!(text.contains("build _generated_headers: phony\n"));
}

#[rstest]
fn differing_flags_are_interned(locator: Pinned) {
    let mut debug_a = cxx("a.o", "a.cpp");
    debug_a["env"] = json!({ "CXXFLAGS": "-O2 -g" });
    let mut debug_b = cxx("b.o", "b.cpp");
    debug_b["env"] = json!({ "CXXFLAGS": "-O2 -g" });
    let mut other = cxx("c.o", "c.cpp");
    other["env"] = json!({ "CXXFLAGS": "-O0" });
    let doc = graph(json!([debug_a, debug_b, other, cxx("d.o", "d.cpp")]));
    let result = run(&doc, &locator).expect("export");

    let reference = |output: &str| {
        find(&result, output)
            .variables
            .get("CXXFLAGS")
            .cloned()
    };
    assert_eq!(reference("a.o").as_deref(), Some("$CXXFLAGS_0"));
    assert_eq!(reference("b.o").as_deref(), Some("$CXXFLAGS_0"));
    assert_eq!(reference("c.o").as_deref(), Some("$CXXFLAGS_1"));
    assert_eq!(reference("d.o"), None);
    assert_eq!(
        result.file.overrides.get("CXXFLAGS"),
        Some(&vec![String::from("${CXXFLAGS} -g"), String::from("-O0")])
    );
}

#[rstest]
fn conflicting_templates_abort(locator: Pinned) {
    let doc = graph(json!([
        cxx("a.o", "a.cpp"),
        {
            "targets": ["b.o"],
            "sources": ["b.cpp"],
            "action": { "kind": "command", "command": "$CXX -c $SOURCES -o $TARGET" }
        }
    ]));
    let err = run(&doc, &locator).expect_err("templates differ");
    assert!(matches!(err, ExportError::RuleConflict { ref tool, .. } if tool == "CXX"));
}

#[rstest]
fn split_debug_outputs_are_dropped(locator: Pinned) {
    let doc = graph(json!([{
        "targets": ["a.o", "a.dwo", "a.su"],
        "sources": ["a.cpp"],
        "action": { "kind": "command", "command": "$CXX -o $TARGET -c $SOURCES" }
    }]));
    let result = run(&doc, &locator).expect("export");
    let edge = find(&result, "a.o");
    assert_eq!(edge.implicit_outputs, vec![String::from("a.su")]);
}

#[rstest]
fn split_debug_only_targets_are_fatal(locator: Pinned) {
    let doc = graph(json!([{
        "targets": ["a.dwo"],
        "sources": ["a.cpp"],
        "action": { "kind": "command", "command": "$CXX -o $TARGET -c $SOURCES" }
    }]));
    let err = run(&doc, &locator).expect_err("nothing left to build");
    assert!(matches!(err, ExportError::StructuralMismatch { .. }));
}

#[rstest]
fn response_file_scripts_read_their_sources_from_the_rspfile(locator: Pinned) {
    let doc = graph(json!([{
        "targets": ["lib.a"],
        "sources": ["tools/pack", "a.o", "b.o"],
        "action": {
            "kind": "command",
            "command": "$SOURCE -o $TARGET ${TEMPFILE(SOURCES[1:])}"
        }
    }]));
    let result = run(&doc, &locator).expect("export");
    let edge = find(&result, "lib.a");
    assert_eq!(edge.rule, "EXEC_RSP");
    assert_eq!(edge.inputs, vec![String::from("a.o"), String::from("b.o")]);
    assert!(edge.implicit.contains(&String::from("tools/pack")));
    let command = edge.variables.get("command").expect("command bound");
    assert!(command.starts_with("tools/pack -o lib.a"), "{command}");
    assert!(command.ends_with(" @lib.a.rsp"), "{command}");

    let rule = result
        .file
        .rules
        .iter()
        .find(|rule| rule.name == "EXEC_RSP")
        .expect("EXEC_RSP rule");
    assert_eq!(rule.command, "$command");
    assert_eq!(rule.rspfile.as_deref(), Some("$out.rsp"));
    assert_eq!(rule.rspfile_content.as_deref(), Some("$in"));

    let text = crate::ninja_gen::generate(&result.file);
    assert!(text.contains("  rspfile = $out.rsp\n  rspfile_content = $in\n"));
    assert!(text.contains("build lib.a: EXEC_RSP a.o b.o | tools/pack"));
}

#[rstest]
fn inline_dependency_generators_split_source_and_header(locator: Pinned) {
    let doc = graph(json!([{
        "targets": ["build/a_gen.cpp", "build/a_gen.h"],
        "sources": ["src/a.idl"],
        "env": {
            "IDLC": "python3 buildscripts/idl/idlc.py",
            "IDL_HAS_INLINE_DEPENDENCIES": true
        },
        "action": { "kind": "command", "command": "$IDLC --base_dir build $SOURCES" }
    }]));
    let result = run(&doc, &locator).expect("export");

    let header = find(&result, "build/a_gen.h");
    assert_eq!(header.rule, "EXEC");
    assert_eq!(header.outputs, vec![String::from("build/a_gen.h")]);
    assert_eq!(header.inputs, vec![String::from("src/a.idl")]);
    assert_eq!(
        header.variables.get("command").map(String::as_str),
        Some("python3 buildscripts/idl/idlc.py --base_dir build src/a.idl --write-dependencies-inline")
    );
    assert_eq!(header.variables.get("deps").map(String::as_str), Some("msvc"));
    assert_eq!(
        header.variables.get("msvc_deps_prefix").map(String::as_str),
        Some("import file:")
    );

    let source = find(&result, "build/a_gen.cpp");
    assert_eq!(source.rule, "phony");
    assert_eq!(source.inputs, vec![String::from("build/a_gen.h")]);
    assert!(result.file.generated_headers.contains("build/a_gen.h"));

    let text = crate::ninja_gen::generate(&result.file);
    assert!(text.contains("build build/a_gen.cpp: phony build/a_gen.h\n"));
    assert!(text.contains("  deps = msvc\n  msvc_deps_prefix = import file:\n"));
}

#[rstest]
fn unknown_tools_are_fatal() {
    let doc = graph(json!([cxx("a.o", "a.cpp")]));
    let err = run(&doc, &Pinned(BTreeMap::new())).expect_err("no compiler");
    assert!(matches!(err, ExportError::MissingTool { ref tool, .. } if tool == "$CXX"));
}

#[rstest]
fn run_targets_reserve_their_shortcut(locator: Pinned) {
    let doc = graph(json!([
        {
            "targets": ["@build/opt/smoke_test"],
            "sources": ["build/opt/smoke_test"],
            "action": { "kind": "command", "command": "$SOURCE --quick" },
            "child_sources": ["build/opt/smoke_test.o", "build/opt/other_test.o"]
        },
        {
            "targets": ["@build/opt/dup"],
            "sources": ["build/opt/dup"],
            "action": { "kind": "command", "command": "$SOURCE" },
            "child_sources": ["build/opt/other_test.o"]
        }
    ]));
    let result = run(&doc, &locator).expect("export");
    let exec = find(&result, "@build/opt/smoke_test");
    assert_eq!(
        exec.variables.get("command").map(String::as_str),
        Some("build/opt/smoke_test --quick")
    );
    assert_eq!(find(&result, "+build/opt/smoke_test").rule, "RUN_TEST");
    assert!(result.suppressed_shortcuts.contains("+other_test"));
    assert!(
        !result
            .file
            .edges
            .iter()
            .any(|edge| edge.primary() == "+other_test")
    );
    assert!(
        result
            .file
            .edges
            .iter()
            .any(|edge| edge.primary() == "+smoke_test")
    );
}

#[rstest]
fn function_actions_fall_back_upstream(locator: Pinned) {
    let doc = graph(json!([{
        "targets": ["version.cpp"],
        "sources": ["version.in"],
        "action": { "kind": "function", "name": "generate_version(target, source, env)" }
    }]));
    let result = run(&doc, &locator).expect("export");
    let edge = find(&result, "version.cpp");
    assert_eq!(edge.rule, "UPSTREAM");
    assert_eq!(edge.implicit, vec![String::from("build.ninja")]);
    assert_eq!(result.fallbacks, vec![String::from("version.cpp")]);
    assert!(result.file.rules.iter().any(|rule| rule.name == "UPSTREAM"));
}

#[rstest]
fn substitution_payload_round_trips(locator: Pinned) {
    let doc = graph(json!([{
        "targets": ["config.h"],
        "sources": ["config.h.in"],
        "action": { "kind": "substitute", "subs": { "@VERSION@": "1.2.3" } }
    }]));
    let result = run(&doc, &locator).expect("export");
    let edge = find(&result, "config.h");
    assert_eq!(edge.rule, "SCRIPT_RSP");
    assert_eq!(edge.variables.get("script").map(String::as_str), Some("subst"));
    let payload = edge.variables.get("rspfile_content").expect("payload");
    let parsed: Value = serde_json::from_str(payload).expect("json payload");
    assert_eq!(
        parsed,
        json!({ "do_chmod": false, "subs": { "@VERSION@": "1.2.3" } })
    );
    assert!(result.file.generated_headers.contains("config.h"));
}

#[rstest]
fn duplicate_outputs_abort(locator: Pinned) {
    let install = json!({
        "targets": ["bin/tool"],
        "sources": ["build/tool"],
        "action": { "kind": "install" }
    });
    let doc = graph(json!([install.clone(), install]));
    let err = run(&doc, &locator).expect_err("duplicate");
    assert!(matches!(err, ExportError::DuplicateOutput { ref output } if output == "bin/tool"));
}

#[rstest]
fn skipped_nodes_are_left_out(locator: Pinned) {
    let doc = graph(json!([
        { "targets": ["build/install/bin/tool"], "sources": ["tool"], "action": { "kind": "install" } },
        { "targets": ["build.ninja"], "sources": [], "action": { "kind": "function", "name": "gen(target, source, env)" } },
        { "targets": ["uuid.txt"], "sources": [], "action": { "kind": "function", "name": "write_uuid_to_file(target, source, env)" } },
        { "targets": ["build/sconf_temp/conftest_1.o"], "sources": ["x.c"], "action": { "kind": "command", "command": "$CC -c" } }
    ]));
    let result = run(&doc, &locator).expect("export");
    assert!(
        result
            .file
            .edges
            .iter()
            .all(|edge| edge.rule == "COMPILER_TIMESTAMPS")
    );
}

#[rstest]
fn static_objects_cannot_enter_shared_libraries(locator: Pinned) {
    let doc = graph(json!([{
        "targets": ["libfoo.so"],
        "sources": ["foo.o"],
        "static_sources": ["foo.o"],
        "action": {
            "kind": "composite",
            "steps": ["SharedFlagChecker(target, source, env)", "$SHLINK -o $TARGET $SOURCES", "LibSymlinksActionFunction(target, source, env)"]
        }
    }]));
    let err = run(&doc, &locator).expect_err("static object");
    assert!(matches!(
        err,
        ExportError::StaticObjectInSharedLibrary { ref source_path, .. } if source_path == "foo.o"
    ));
}

#[rstest]
fn reserved_variables_are_rejected(locator: Pinned) {
    let doc = graph(json!([{
        "targets": ["a.o"],
        "sources": ["a.cpp"],
        "action": { "kind": "command", "command": "$CXX $HELPER -o $TARGET -c $SOURCES" }
    }]));
    let err = run(&doc, &locator).expect_err("HELPER is reserved");
    assert!(matches!(err, ExportError::ReservedVariable { ref name } if name == "HELPER"));
}

#[rstest]
fn aliases_and_defaults_are_carried(locator: Pinned) {
    let doc = graph_with(
        json!([cxx("a.o", "a.cpp")]),
        json!({
            "aliases": [{ "name": "objects", "sources": ["a.o"] }],
            "defaults": ["objects", "a.o"]
        }),
    );
    let result = run(&doc, &locator).expect("export");
    assert_eq!(
        result.file.aliases.get("objects"),
        Some(&vec![String::from("a.o")])
    );
    assert_eq!(
        result.file.defaults,
        vec![String::from("a.o"), String::from("objects")]
    );
}

#[rstest]
fn pch_requires_a_layout(locator: Pinned) {
    let doc = graph(json!([cxx("a.o", "a.cpp")]));
    let mut opts = options();
    opts.pch = true;
    let err = export(&doc, &opts, &locator, &LibdepsBinding).expect_err("no layout");
    assert!(matches!(err, ExportError::Configuration { .. }));
}

#[rstest]
fn ccache_prefixes_compile_rules(locator: Pinned) {
    let doc = graph(json!([cxx("a.o", "a.cpp")]));
    let mut opts = options();
    opts.ccache = Some(String::from("/usr/bin/ccache"));
    let result = export(&doc, &opts, &locator, &LibdepsBinding).expect("export");
    let rule = result
        .file
        .rules
        .iter()
        .find(|rule| rule.name == "CXX")
        .expect("CXX rule");
    assert!(rule.command.starts_with("/usr/bin/ccache $CXX"));
}
