use anyhow::{Context, bail};
use clap::Parser;
use indexmap::IndexMap;
use php_class_linker::compiler::manifest::ClassManifest;
use php_class_linker::core::intern;
use php_class_linker::runtime::context::{EngineBuilder, RequestContext};
use php_class_linker::runtime::reflect::{ClassInfo, describe};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "classlink")]
#[command(about = "Link PHP class declarations and print the resolved classes", long_about = None)]
struct Cli {
    /// JSON manifest of class declarations
    #[arg(name = "MANIFEST")]
    manifest: PathBuf,

    /// Only print this class (its dependencies are still linked)
    #[arg(short, long)]
    class: Option<String>,

    /// Print compact JSON
    #[arg(long)]
    compact: bool,

    /// Honor __MockClass attributes
    #[arg(long)]
    allow_mocks: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let manifest = ClassManifest::load(&cli.manifest)
        .with_context(|| format!("loading {}", cli.manifest.display()))?;
    let decls: Vec<_> = manifest.decls().cloned().collect();

    let engine = EngineBuilder::new()
        .allow_mock_classes(cli.allow_mocks)
        .with_autoloader(manifest)
        .build();
    let mut ctx = RequestContext::new(engine);

    let mut out: IndexMap<String, ClassInfo> = IndexMap::new();
    match &cli.class {
        Some(name) => {
            let Some(decl) = decls.iter().find(|d| d.name.lower() == intern(name).lower()) else {
                bail!("class {} is not declared in the manifest", name);
            };
            let cls = ctx
                .define_class(decl)
                .with_context(|| format!("linking {}", decl.name))?;
            out.insert(cls.name().to_string(), describe(&cls));
        }
        None => {
            for decl in &decls {
                let cls = ctx
                    .define_class(decl)
                    .with_context(|| format!("linking {}", decl.name))?;
                out.insert(cls.name().to_string(), describe(&cls));
            }
        }
    }

    let text = if cli.compact {
        serde_json::to_string(&out)?
    } else {
        serde_json::to_string_pretty(&out)?
    };
    println!("{}", text);
    Ok(())
}
