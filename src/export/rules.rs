//! Rule and pool declarations.
//!
//! Only rules referenced by at least one edge are declared. Toolchain rules
//! take their command from the [`RuleTable`]; their dependency tracking
//! differs between GCC-style drivers and MSVC.

use std::collections::BTreeSet;

use super::classify::Tool;
use super::model::{Pool, Rule};
use super::rewrite::RuleTable;
use crate::graph::{TargetOs, Toolchain};

/// Copies a file.
pub const INSTALL: &str = "INSTALL";
/// Runs the command bound on the edge.
pub const EXEC: &str = "EXEC";
/// Runs the command bound on the edge with `$in` in a response file.
pub const EXEC_RSP: &str = "EXEC_RSP";
/// Runs a helper with a JSON payload in a response file.
pub const SCRIPT_RSP: &str = "SCRIPT_RSP";
/// Produces the compile database.
pub const COMPILE_DB: &str = "COMPILE_DB";
/// Refreshes the compiler timestamp markers.
pub const COMPILER_TIMESTAMPS: &str = "COMPILER_TIMESTAMPS";
/// Re-invokes the upstream tool for a single target.
pub const UPSTREAM: &str = "UPSTREAM";
/// Packages the compiler for distributed compilation.
pub const MAKE_ICECC_ENV: &str = "MAKE_ICECC_ENV";
/// Runs its input in the console.
pub const RUN_TEST: &str = "RUN_TEST";
/// Regenerates the Ninja file.
pub const GENERATOR: &str = "GENERATOR";
/// Built-in grouping rule.
pub const PHONY: &str = "phony";

const CONSOLE: &str = "console";
const LOCAL_POOL: &str = "local";
const WINLINK_POOL: &str = "winlink";

/// Pool setup when compiles are distributed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistributedPools {
    /// Depth of the `local` pool.
    pub local_depth: usize,
    /// Whether compiles also run in the `local` pool.
    pub limit_compiles: bool,
}

/// Inputs to [`declare`].
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    /// Compiler family.
    pub toolchain: Toolchain,
    /// Target operating system.
    pub os: TargetOs,
    /// Toolchain templates.
    pub tools: &'a RuleTable,
    /// Upstream program, e.g. `python3 scons.py`.
    pub upstream_program: &'a str,
    /// Upstream quiet flag.
    pub quiet_flag: &'a str,
    /// Executor binary, when known.
    pub ninja: Option<&'a str>,
    /// Distributed compilation pools.
    pub distributed: Option<DistributedPools>,
    /// Depth of the MSVC link pool.
    pub link_pool_depth: usize,
}

/// Declare pools and the rules named in `used`.
#[must_use]
pub fn declare(ctx: &RuleContext<'_>, used: &BTreeSet<&str>) -> (Vec<Pool>, Vec<Rule>) {
    let mut pools = Vec::new();
    let mut rules = Vec::new();
    let local_pool = ctx.distributed.map(|distributed| {
        pools.push(Pool {
            name: LOCAL_POOL.to_owned(),
            depth: distributed.local_depth,
        });
        LOCAL_POOL
    });
    let compile_pool = ctx
        .distributed
        .filter(|distributed| distributed.limit_compiles)
        .and(local_pool);

    let mut add = |rule: Rule| {
        if used.contains(rule.name.as_str()) {
            rules.push(rule);
        }
    };

    add(Rule::new(MAKE_ICECC_ENV, "$cmd")
        .pool(Some(CONSOLE))
        .description("MAKE_ICECC_ENV $out"));
    add(Rule::new(RUN_TEST, "$in")
        .description("RUN_TEST $in")
        .pool(Some(CONSOLE)));
    add(Rule::new(EXEC, "$command").pool(local_pool));
    add(Rule::new(EXEC_RSP, "$command").pool(local_pool).rsp("$in"));
    add(Rule::new(INSTALL, "$COPY $in $out")
        .pool(local_pool)
        .description("INSTALL $out"));
    add(Rule::new(SCRIPT_RSP, "$HELPER $script $in $out $out.rsp")
        .pool(local_pool)
        .rsp("$rspfile_content")
        .restat()
        .description("GEN $out"));
    add(Rule::new(COMPILER_TIMESTAMPS, "$HELPER compiler-timestamps $in $out")
        .pool(local_pool)
        .restat()
        .description("Checking for compiler upgrades"));
    add(Rule::new(
        UPSTREAM,
        format!("{} {} $upstream_args $out", ctx.upstream_program, ctx.quiet_flag),
    )
    .pool(Some(CONSOLE))
    .description("UPSTREAM $out")
    .restat());
    if let Some(ninja) = ctx.ninja {
        let base = format!("{ninja} -f $in -t compdb CXX CC SHCXX SHCC > $out.tmp");
        let command = if ctx.os.is_windows() {
            format!("cmd /c {base} && move /y $out.tmp $out")
        } else {
            format!("{base} && mv -f $out.tmp $out")
        };
        add(Rule::new(COMPILE_DB, command)
            .pool(local_pool)
            .description("COMPILE_DB $out"));
    }

    let toolchain_rules = if ctx.toolchain.is_gcc_like() {
        gcc_rules(ctx.tools, compile_pool, local_pool)
    } else {
        let (winlink, msvc) = msvc_rules(ctx.tools);
        if winlink && Tool::ALL.iter().any(|tool| tool.is_link() && used.contains(tool.name())) {
            pools.push(Pool {
                name: WINLINK_POOL.to_owned(),
                depth: ctx.link_pool_depth,
            });
        }
        msvc
    };
    for rule in toolchain_rules {
        add(rule);
    }
    (pools, rules)
}

fn gcc_rules(tools: &RuleTable, compile_pool: Option<&str>, local_pool: Option<&str>) -> Vec<Rule> {
    let mut rules = Vec::new();
    for tool in Tool::ALL {
        let Some(command) = tools.get(tool) else {
            continue;
        };
        let name = tool.name();
        let rule = match tool {
            Tool::Cxx | Tool::ShCxx | Tool::Cc | Tool::ShCc => {
                let mut rule = Rule::new(name, format!("{command} -MMD -MF $out.d"))
                    .pool(compile_pool)
                    .description(format!("{name} $out"));
                rule.deps = Some(String::from("gcc"));
                rule.depfile = Some(String::from("$out.d"));
                rule
            }
            Tool::Link | Tool::ShLink => {
                let label = if tool == Tool::Link { "LINK" } else { "DYNLIB" };
                link_with_rsp(name, command)
                    .pool(local_pool)
                    .description(format!("{label} $out"))
            }
            Tool::Ar => Rule::new(name, format!("rm -f $out && {command}"))
                .pool(local_pool)
                .description("STATICLIB $out"),
            Tool::Rc => Rule::new(name, command).description("RC $out"),
        };
        rules.push(rule);
    }
    rules
}

/// Move everything after the linker word into a response file.
fn link_with_rsp(name: &str, command: &str) -> Rule {
    let word = format!("${name} ");
    match command.split_once(&word) {
        Some((before, args)) => Rule::new(name, format!("{before}${name} @$out.rsp")).rsp(args),
        None => Rule::new(name, command),
    }
}

/// MSVC rules; the flag reports whether a link rule needs the link pool.
fn msvc_rules(tools: &RuleTable) -> (bool, Vec<Rule>) {
    let mut rules = Vec::new();
    let mut winlink = false;
    for tool in Tool::ALL {
        let Some(command) = tools.get(tool) else {
            continue;
        };
        let name = tool.name();
        let rule = match tool {
            Tool::Cxx | Tool::ShCxx | Tool::Cc | Tool::ShCc => {
                let mut rule = Rule::new(name, format!("{command} /showIncludes"))
                    .description(format!("{name} $out"));
                rule.deps = Some(String::from("msvc"));
                rule
            }
            Tool::Link | Tool::ShLink => {
                winlink = true;
                let word = format!("${name} ");
                let mut args = command.replace(&word, "");
                if tool == Tool::ShLink {
                    args = args.replace("$out", "/OUT:$out");
                }
                Rule::new(
                    name,
                    format!("cmd /c $HELPER split-lines $out.rsp && ${name} @$out.rsp"),
                )
                .rsp(args)
                .pool(Some(WINLINK_POOL))
                .description(format!("{name} $out"))
            }
            Tool::Ar => Rule::new(name, command).description("STATICLIB $out"),
            Tool::Rc => Rule::new(name, command).description("RC $out"),
        };
        rules.push(rule);
    }
    (winlink, rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn context(toolchain: Toolchain, os: TargetOs, tools: &RuleTable) -> RuleContext<'_> {
        RuleContext {
            toolchain,
            os,
            tools,
            upstream_program: "scons",
            quiet_flag: "-Q",
            ninja: Some("/usr/bin/ninja"),
            distributed: None,
            link_pool_depth: 4,
        }
    }

    fn find<'r>(rules: &'r [Rule], name: &str) -> &'r Rule {
        rules
            .iter()
            .find(|rule| rule.name == name)
            .unwrap_or_else(|| panic!("rule {name} missing"))
    }

    #[rstest]
    fn declares_only_used_rules() {
        let tools = RuleTable::default();
        let used = BTreeSet::from([INSTALL]);
        let (pools, rules) = declare(&context(Toolchain::Gcc, TargetOs::Linux, &tools), &used);
        assert!(pools.is_empty());
        assert_eq!(rules.len(), 1);
        assert_eq!(find(&rules, INSTALL).command, "$COPY $in $out");
    }

    #[rstest]
    fn gcc_links_use_response_files() {
        let mut tools = RuleTable::default();
        tools
            .register(Tool::Link, "$LINK -o $out $LINKFLAGS $in $_LIBFLAGS")
            .expect("register");
        tools
            .register(Tool::Cxx, "$CXX -o $out -c $CXXFLAGS $in")
            .expect("register");
        let used = BTreeSet::from(["LINK", "CXX"]);
        let (_, rules) = declare(&context(Toolchain::Gcc, TargetOs::Linux, &tools), &used);
        let link = find(&rules, "LINK");
        assert_eq!(link.command, "$LINK @$out.rsp");
        assert_eq!(
            link.rspfile_content.as_deref(),
            Some("-o $out $LINKFLAGS $in $_LIBFLAGS")
        );
        let cxx = find(&rules, "CXX");
        assert_eq!(cxx.command, "$CXX -o $out -c $CXXFLAGS $in -MMD -MF $out.d");
        assert_eq!(cxx.deps.as_deref(), Some("gcc"));
    }

    #[rstest]
    fn msvc_links_split_their_response_files() {
        let mut tools = RuleTable::default();
        tools
            .register(Tool::ShLink, "$SHLINK /dll $out $in")
            .expect("register");
        let used = BTreeSet::from(["SHLINK"]);
        let (pools, rules) =
            declare(&context(Toolchain::Msvc, TargetOs::Windows, &tools), &used);
        assert_eq!(
            pools,
            vec![Pool {
                name: String::from("winlink"),
                depth: 4
            }]
        );
        let shlink = find(&rules, "SHLINK");
        assert_eq!(
            shlink.command,
            "cmd /c $HELPER split-lines $out.rsp && $SHLINK @$out.rsp"
        );
        assert_eq!(shlink.rspfile_content.as_deref(), Some("/dll /OUT:$out $in"));
    }

    #[rstest]
    fn distributed_builds_add_a_local_pool() {
        let tools = RuleTable::default();
        let mut ctx = context(Toolchain::Clang, TargetOs::Linux, &tools);
        ctx.distributed = Some(DistributedPools {
            local_depth: 8,
            limit_compiles: false,
        });
        let used = BTreeSet::from([EXEC, COMPILE_DB]);
        let (pools, rules) = declare(&ctx, &used);
        assert_eq!(pools.first().map(|pool| pool.depth), Some(8));
        assert_eq!(find(&rules, EXEC).pool.as_deref(), Some("local"));
        assert!(find(&rules, COMPILE_DB).command.ends_with("&& mv -f $out.tmp $out"));
    }
}
