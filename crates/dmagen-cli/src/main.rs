use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use miette::{Context, IntoDiagnostic};

use dmagen_opt::{DmaGenerationOptions, PASS_NAMES, PassManager, create_pass, validate_module};

/// dmagen: DMA generation for affine loop nests
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Input IR file
    input: PathBuf,

    /// Output path (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Pass to run, in order; may be repeated (default: dma-generate)
    #[arg(long = "pass", value_name = "NAME")]
    passes: Vec<String>,

    /// Memory space whose memrefs are promoted
    #[arg(long, default_value_t = 0)]
    slow_memory_space: u32,

    /// Memory space of generated buffers
    #[arg(long, default_value_t = 1)]
    fast_memory_space: u32,

    /// Minimum DMA transfer size supported by the target, in bytes
    #[arg(long, default_value_t = 1024)]
    min_dma_transfer_size: u64,

    /// Overrides --fast-memory-space
    #[arg(long, hide = true)]
    dma_fast_memory_space: Option<u32>,

    /// Parse, verify and transform without producing output
    #[arg(long)]
    dry_run: bool,
}

impl Cli {
    fn options(&self) -> DmaGenerationOptions {
        DmaGenerationOptions {
            slow_memory_space: self.slow_memory_space,
            fast_memory_space: self.fast_memory_space,
            min_dma_transfer_size: self.min_dma_transfer_size,
            fast_memory_space_override: self.dma_fast_memory_space,
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();

    // 1. Read source file.
    let source = std::fs::read_to_string(&cli.input)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to read {}", cli.input.display()))?;

    // 2. Parse to IR.
    let mut module = dmagen_parser::parse_module(&source)
        .map_err(|e| miette::miette!("{e}"))
        .wrap_err_with(|| format!("failed to parse {}", cli.input.display()))?;

    // 3. Verify input.
    for (_, func) in module.functions.iter() {
        dmagen_ir::verify_function(func)
            .map_err(|e| miette::miette!("{e}"))
            .wrap_err_with(|| format!("invalid function '@{}'", func.name))?;
    }

    // 4. Build and run the pipeline.
    let options = cli.options();
    let names = if cli.passes.is_empty() {
        vec!["dma-generate".to_string()]
    } else {
        cli.passes.clone()
    };
    let mut pm = PassManager::new();
    for name in &names {
        let pass = create_pass(name, &options).ok_or_else(|| {
            miette::miette!(
                "unknown pass '{}' (available: {})",
                name,
                PASS_NAMES.join(", ")
            )
        })?;
        pm.add_pass(pass);
    }
    let changed = pm.run(&mut module);
    log::info!("pipeline [{}] changed={changed}", pm.pass_names().join(", "));

    let failures = validate_module(&module);
    if failures > 0 {
        return Err(miette::miette!(
            "{failures} function(s) failed verification after transformation"
        ));
    }

    // 5. Dry-run: stop here.
    if cli.dry_run {
        return Ok(());
    }

    // 6. Write output.
    let text = dmagen_ir::dump_module(&module);
    match &cli.output {
        Some(path) => std::fs::write(path, text)
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to write {}", path.display()))?,
        None => print!("{text}"),
    }
    Ok(())
}
