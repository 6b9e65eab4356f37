//! Ninja file writer.
//!
//! Renders an [`crate::export::NinjaFile`] to text. The writer performs no
//! decisions of its own: order and content come from the model, so the same
//! model always renders to byte-identical output.

use crate::export::{
    ALWAYS_BUILD, Edge, GENERATED_HEADERS, GENERATOR, NinjaFile, Pool, Rule, escape_path,
};
use itertools::Itertools;
use std::fmt::{self, Display, Formatter};

/// Oldest Ninja release understanding the emitted syntax.
pub const REQUIRED_VERSION: &str = "1.7";

macro_rules! write_kv {
    ($f:expr, $key:expr, $opt:expr) => {
        if let Some(val) = $opt {
            writeln!($f, "  {} = {}", $key, val)?;
        }
    };
}

macro_rules! write_flag {
    ($f:expr, $key:expr, $cond:expr) => {
        if $cond {
            writeln!($f, "  {} = 1", $key)?;
        }
    };
}

/// Render `file` as Ninja text.
#[must_use]
pub fn generate(file: &NinjaFile) -> String {
    DisplayFile(file).to_string()
}

/// Escape and space-join paths for a `build` line.
fn join<'p>(paths: impl IntoIterator<Item = &'p String>) -> String {
    paths.into_iter().map(|path| escape_path(path)).join(" ")
}

struct DisplayFile<'a>(&'a NinjaFile);

impl Display for DisplayFile<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let file = self.0;
        if let Some(ninja) = &file.shebang {
            writeln!(f, "#!{ninja} -f")?;
            writeln!(f)?;
        }
        writeln!(f, "# Generated by ninjafy. DO NOT EDIT.")?;
        writeln!(f, "ninja_required_version = {REQUIRED_VERSION}")?;
        if let Some(builddir) = &file.builddir {
            writeln!(f, "builddir = {builddir}")?;
        }
        writeln!(f)?;

        for pool in &file.pools {
            write!(f, "{}", DisplayPool(pool))?;
        }
        writeln!(f, "upstream_args = {}", file.upstream_args)?;
        writeln!(f)?;

        if !file.vars.is_empty() {
            for (name, value) in &file.vars {
                writeln!(f, "{name} = {value}")?;
            }
            writeln!(f)?;
        }
        if !file.overrides.is_empty() {
            for (name, values) in &file.overrides {
                for (index, value) in values.iter().enumerate() {
                    writeln!(f, "{name}_{index} = {value}")?;
                }
            }
            writeln!(f)?;
        }

        for rule in &file.rules {
            write!(f, "{}", DisplayRule(rule))?;
        }
        for edge in &file.edges {
            write!(f, "{}", DisplayEdge(edge))?;
        }

        for (alias, sources) in &file.aliases {
            writeln!(f, "build {}: phony {}", escape_path(alias), join(sources))?;
        }
        if !file.aliases.is_empty() {
            writeln!(f)?;
        }
        write!(f, "build {GENERATED_HEADERS}: phony")?;
        if !file.generated_headers.is_empty() {
            write!(f, " {}", join(&file.generated_headers))?;
        }
        writeln!(f)?;
        writeln!(f, "build {ALWAYS_BUILD}: phony")?;
        writeln!(f)?;

        let regen = &file.regenerator;
        writeln!(f, "rule {GENERATOR}")?;
        writeln!(f, "  command = {}", regen.command)?;
        writeln!(f, "  description = Regenerating $out")?;
        writeln!(f, "  depfile = {}", regen.depfile)?;
        writeln!(f, "  generator = 1")?;
        writeln!(f, "  pool = console")?;
        writeln!(f, "  restat = 1")?;
        writeln!(f)?;
        writeln!(f, "build {}: {GENERATOR}", escape_path(&regen.output))?;
        writeln!(f)?;

        if !file.defaults.is_empty() {
            writeln!(f, "default {}", join(&file.defaults))?;
            writeln!(f)?;
        }
        writeln!(f, "# vim: set textwidth=0 :")?;
        writeln!(f, "# -*- eval: (auto-fill-mode -1) -*-")
    }
}

struct DisplayPool<'a>(&'a Pool);

impl Display for DisplayPool<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "pool {}", self.0.name)?;
        writeln!(f, "  depth = {}", self.0.depth)?;
        writeln!(f)
    }
}

struct DisplayRule<'a>(&'a Rule);

impl Display for DisplayRule<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let rule = self.0;
        writeln!(f, "rule {}", rule.name)?;
        writeln!(f, "  command = {}", rule.command)?;
        write_kv!(f, "description", &rule.description);
        write_kv!(f, "depfile", &rule.depfile);
        write_flag!(f, "generator", rule.generator);
        write_kv!(f, "pool", &rule.pool);
        write_flag!(f, "restat", rule.restat);
        write_kv!(f, "rspfile", &rule.rspfile);
        write_kv!(f, "rspfile_content", &rule.rspfile_content);
        write_kv!(f, "deps", &rule.deps);
        writeln!(f)
    }
}

struct DisplayEdge<'a>(&'a Edge);

impl Display for DisplayEdge<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let edge = self.0;
        write!(f, "build {}", join(&edge.outputs))?;
        if !edge.implicit_outputs.is_empty() {
            write!(f, " | {}", join(&edge.implicit_outputs))?;
        }
        write!(f, ": {}", edge.rule)?;
        if !edge.inputs.is_empty() {
            write!(f, " {}", join(&edge.inputs))?;
        }
        if !edge.implicit.is_empty() {
            write!(f, " | {}", join(&edge.implicit))?;
        }
        if !edge.order_only.is_empty() {
            write!(f, " || {}", join(&edge.order_only))?;
        }
        writeln!(f)?;
        for (name, value) in &edge.variables {
            writeln!(f, "  {name} = {value}")?;
        }
        writeln!(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::Regenerator;
    use rstest::{fixture, rstest};
    use std::collections::{BTreeMap, BTreeSet};

    #[fixture]
    fn file() -> NinjaFile {
        NinjaFile {
            shebang: None,
            builddir: None,
            upstream_args: String::new(),
            pools: Vec::new(),
            vars: BTreeMap::new(),
            overrides: BTreeMap::new(),
            rules: Vec::new(),
            edges: Vec::new(),
            aliases: BTreeMap::new(),
            generated_headers: BTreeSet::new(),
            regenerator: Regenerator {
                output: String::from("build.ninja"),
                command: String::from("scons $upstream_args $out"),
                depfile: String::from("build.ninja.deps"),
                deps: Vec::new(),
            },
            defaults: Vec::new(),
        }
    }

    const TRAILER: &str = concat!(
        "build _generated_headers: phony\n",
        "build _ALWAYS_BUILD: phony\n\n",
        "rule GENERATOR\n",
        "  command = scons $upstream_args $out\n",
        "  description = Regenerating $out\n",
        "  depfile = build.ninja.deps\n",
        "  generator = 1\n",
        "  pool = console\n",
        "  restat = 1\n\n",
        "build build.ninja: GENERATOR\n\n",
    );

    #[rstest]
    fn renders_an_empty_file(file: NinjaFile) {
        let expected = format!(
            "{}{}{}",
            concat!(
                "# Generated by ninjafy. DO NOT EDIT.\n",
                "ninja_required_version = 1.7\n\n",
                "upstream_args = \n\n",
            ),
            TRAILER,
            "# vim: set textwidth=0 :\n# -*- eval: (auto-fill-mode -1) -*-\n",
        );
        assert_eq!(generate(&file), expected);
    }

    #[rstest]
    fn renders_rules_edges_and_overrides(mut file: NinjaFile) {
        file.shebang = Some(String::from("/usr/bin/ninja"));
        file.upstream_args = String::from("\"-j8\"");
        file.vars.insert(String::from("CXXFLAGS"), String::from("-O2"));
        file.overrides.insert(
            String::from("CXXFLAGS"),
            vec![String::from("${CXXFLAGS} -g")],
        );
        let mut rule = Rule::new("CXX", "$CXX -c $in -o $out").description("CXX $out");
        rule.deps = Some(String::from("gcc"));
        rule.depfile = Some(String::from("$out.d"));
        file.rules.push(rule);
        file.edges.push(
            Edge::new("CXX", vec![String::from("my dir/a.o")])
                .inputs(vec![String::from("c:/src/a.cpp")])
                .implicit(vec![String::from("/usr/bin/g++")])
                .order_only(vec![String::from(GENERATED_HEADERS)])
                .var("CXXFLAGS", "$CXXFLAGS_0"),
        );
        file.aliases
            .insert(String::from("all"), vec![String::from("my dir/a.o")]);
        file.defaults.push(String::from("all"));

        let expected = format!(
            "{}{}{}",
            concat!(
                "#!/usr/bin/ninja -f\n\n",
                "# Generated by ninjafy. DO NOT EDIT.\n",
                "ninja_required_version = 1.7\n\n",
                "upstream_args = \"-j8\"\n\n",
                "CXXFLAGS = -O2\n\n",
                "CXXFLAGS_0 = ${CXXFLAGS} -g\n\n",
                "rule CXX\n",
                "  command = $CXX -c $in -o $out\n",
                "  description = CXX $out\n",
                "  depfile = $out.d\n",
                "  deps = gcc\n\n",
                "build my$ dir/a.o: CXX c$:/src/a.cpp | /usr/bin/g++ || _generated_headers\n",
                "  CXXFLAGS = $CXXFLAGS_0\n\n",
                "build all: phony my$ dir/a.o\n\n",
            ),
            TRAILER,
            concat!(
                "default all\n\n",
                "# vim: set textwidth=0 :\n",
                "# -*- eval: (auto-fill-mode -1) -*-\n",
            ),
        );
        assert_eq!(generate(&file), expected);
    }

    #[rstest]
    fn rendering_is_deterministic(mut file: NinjaFile) {
        file.generated_headers.insert(String::from("b.h"));
        file.generated_headers.insert(String::from("a.h"));
        let first = generate(&file);
        assert_eq!(first, generate(&file.clone()));
        assert!(first.contains("build _generated_headers: phony a.h b.h\n"));
    }
}
