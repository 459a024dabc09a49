//! Minimal harness CLI: scenarios | reencode
use std::io::Read;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use json_objgraph::{Codec, Config, TypeDescriptor, TypeKind, TypeRegistry};

use crate::scenarios;

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

/// run object graphs through the codec and inspect the trees it produces
#[derive(Parser, Debug)]
pub struct CommandLineInterface {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// encode the built-in scenario graphs, print their trees and check round trips
    Scenarios(ScenariosOut),
    /// decode a JSON tree and encode the result again
    Reencode(ReencodeOut),
}

#[derive(Args, Debug, Clone)]
struct OutputSettings {
    /// pretty-print JSON trees
    #[arg(long, default_value_t = false)]
    pretty: bool,

    /// debugging
    #[arg(long)]
    no_op: bool,
}

#[derive(clap::Parser, Debug)]
struct ScenariosOut {
    #[command(flatten)]
    output_settings: OutputSettings,

    /// run a single scenario by name (a, b, c, d, e, cycle, streams, subtypes)
    #[arg(long)]
    only: Option<String>,
}

#[derive(clap::Parser, Debug)]
struct ReencodeOut {
    #[command(flatten)]
    output_settings: OutputSettings,

    /// JSON tree file, or '-' for stdin
    #[arg(long, short)]
    input: String,

    /// registered type as NAME[:object|sequence|mapping][:BASE,BASE...]
    #[arg(long = "type", short = 't')]
    types: Vec<String>,

    /// fail on bases a type does not declare
    #[arg(long, default_value_t = false)]
    strict_bases: bool,

    /// output .json file (stdout if omitted)
    #[arg(short, long)]
    out: Option<PathBuf>,
}

// ————————————————————————————————————————————————————————————————————————————
// IMPLEMENTATION
// ————————————————————————————————————————————————————————————————————————————

impl CommandLineInterface {
    pub fn load() -> Self {
        Self::parse()
    }
    pub fn run(&self) -> Result<()> {
        match &self.cmd {
            Command::Scenarios(target) => {
                if target.output_settings.no_op {
                    eprintln!("{self:#?}");
                    return Ok(());
                }
                let config = Config::new().pretty(target.output_settings.pretty);
                let mut failed = 0;
                for scenario in scenarios::all() {
                    if target.only.as_deref().is_some_and(|only| only != scenario.name) {
                        continue;
                    }
                    let report = scenario.run(config.clone())?;
                    println!("== {} ({})", scenario.name, scenario.about);
                    println!("{}", report.tree);
                    if report.ok {
                        eprintln!("✅ round trip holds");
                    } else {
                        failed += 1;
                        eprintln!("❌ round trip broken");
                    }
                }
                if failed > 0 {
                    bail!("{failed} scenario(s) failed");
                }
                Ok(())
            }
            Command::Reencode(target) => {
                if target.output_settings.no_op {
                    eprintln!("{self:#?}");
                    return Ok(());
                }
                let mut registry = TypeRegistry::new();
                for arg in &target.types {
                    registry.register(parse_type_arg(arg)?)?;
                }
                let config = Config::new()
                    .pretty(target.output_settings.pretty)
                    .strict_bases(target.strict_bases);
                let codec = Codec::new(registry)
                    .with_config(config)
                    .with_fallback(scenarios::fallback());

                let source = read_input(&target.input)?;
                let value = codec
                    .from_str(&source)
                    .with_context(|| format!("failed to decode {}", target.input))?;
                let text = codec.to_string(&value)?;

                if let Some(out) = target.out.as_ref() {
                    if let Some(parent) = out.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(out, &text)?;
                } else {
                    println!("{text}");
                }
                Ok(())
            }
        }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// INTERNAL HELPERS
// ————————————————————————————————————————————————————————————————————————————

fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut source = String::new();
        std::io::stdin().read_to_string(&mut source)?;
        return Ok(source);
    }
    std::fs::read_to_string(input).with_context(|| format!("failed to read {input}"))
}

fn parse_type_arg(arg: &str) -> Result<TypeDescriptor> {
    let mut parts = arg.split(':');
    let name = parts.next().filter(|n| !n.is_empty());
    let Some(name) = name else { bail!("empty type name in `{arg}`") };
    let kind = match parts.next() {
        None | Some("") | Some("object") => TypeKind::Object,
        Some("sequence") => TypeKind::Sequence,
        Some("mapping") => TypeKind::Mapping,
        Some(other) => bail!("unknown type kind `{other}` in `{arg}`"),
    };
    let mut descriptor = TypeDescriptor::new(name, kind);
    for base in parts.next().into_iter().flat_map(|bases| bases.split(',')) {
        if !base.is_empty() {
            descriptor = descriptor.with_base(base);
        }
    }
    if parts.next().is_some() {
        bail!("too many `:` sections in `{arg}`");
    }
    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_specs() {
        let d = parse_type_arg("Point").unwrap();
        assert_eq!((d.name(), d.kind()), ("Point", TypeKind::Object));

        let d = parse_type_arg("Stack:sequence:list,Sized").unwrap();
        assert_eq!(d.kind(), TypeKind::Sequence);
        assert_eq!(d.bases(), ["list".to_string(), "Sized".to_string()]);

        assert!(parse_type_arg(":object").is_err());
        assert!(parse_type_arg("X:tree").is_err());
        assert!(parse_type_arg("X:object:a:b").is_err());
    }
}
