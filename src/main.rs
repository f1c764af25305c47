use clap::Parser;
use tracing_subscriber::EnvFilter;

use docpipe::{
    DataDir, Error, PipelineFactory, PipelineSelector, Result, SearchRecord,
    cli::{self, Cli, Command, IndexArgs, SearchArgs},
    extract::TextExtractor,
    index::run_index,
    pipeline::Variant,
    search::run_search,
};

fn init_tracing(verbose: u8) {
    let filter = if let Ok(env) = std::env::var("DOCPIPE_LOG") {
        EnvFilter::new(env)
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;

    match cli.command {
        Command::Variants { json } => cmd_variants(json)?,
        Command::Index(args) => cmd_index(data_dir, &args)?,
        Command::Search(args) => cmd_search(data_dir, &args)?,
    }

    Ok(())
}

fn cmd_variants(json: bool) -> Result<()> {
    let variants = PipelineSelector::list_variants();

    if json {
        let listing: Vec<serde_json::Value> = variants
            .iter()
            .map(|(name, specs)| {
                serde_json::json!({ "name": name, "params": specs })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&listing)?);
    } else {
        for (name, specs) in &variants {
            println!("{name}");
            for spec in specs {
                println!(
                    "  {} = {}",
                    spec.name,
                    serde_json::to_string(&spec.default)?
                );
            }
        }
    }
    Ok(())
}

fn cmd_index(data_dir: DataDir, args: &IndexArgs) -> Result<()> {
    let variant = Variant::from_name(&args.pipeline)?;
    let params = cli::resolve_params(variant, &args.params)?;

    let extractor = TextExtractor::new();
    let docs = cli::gather_documents(args, &extractor)?;
    if docs.is_empty() {
        return Err(Error::Config(
            "nothing to index: pass files, --text, or --docs".into(),
        ));
    }

    let factory = PipelineFactory::new(data_dir);
    let mut pipeline = factory.build(variant, &params)?;
    let ids = run_index(&mut pipeline, &docs, !args.no_clear)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&ids)?);
    } else {
        for id in &ids {
            println!("{id}");
        }
        eprintln!(
            "Indexed {} document(s) into '{}'",
            ids.len(),
            pipeline.index_name()
        );
    }
    Ok(())
}

fn cmd_search(data_dir: DataDir, args: &SearchArgs) -> Result<()> {
    let variant = Variant::from_name(&args.pipeline)?;
    let params = cli::resolve_params(variant, &args.params)?;

    let factory = PipelineFactory::new(data_dir);
    let mut pipeline = factory.build(variant, &params)?;
    let results = run_search(&mut pipeline, &args.queries)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    for (query, records) in args.queries.iter().zip(&results) {
        println!("# {query}");
        if records.is_empty() {
            println!("  (no results)");
            continue;
        }
        for record in records {
            let hit = record.hit();
            match record {
                SearchRecord::Audio { path, score, .. } => match score {
                    Some(score) => println!(
                        "  {score:.3}  {}  [audio] {}",
                        hit.id,
                        path.display()
                    ),
                    None => {
                        println!("  {}  [audio] {}", hit.id, path.display())
                    }
                },
                _ => match record.score() {
                    Some(score) => {
                        println!("  {score:.3}  {}  {}", hit.id, hit.text)
                    }
                    None => println!("  {}  {}", hit.id, hit.text),
                },
            }
        }
    }
    Ok(())
}
