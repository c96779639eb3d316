use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use esimport::config::{EntryDirective, ImporterConfig};
use esimport::host::{ScriptHost, SinkHost};
use esimport::importer::Importer;
use esimport::loader::{DefaultTransport, JsonFileStore, Store, Transport};
use esimport::pipeline::NoopPrePass;

const CACHE_FILE: &str = ".esimport-cache.json";

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!(
            "Usage: {} <page.html | entry-path> [--out <file>] [--debug] [--cache-all] [--npm-modules <list>]",
            args[0]
        );
        process::exit(2);
    }

    let input = args[1].clone();
    let mut out: Option<PathBuf> = None;
    let mut debug = false;
    let mut cache_all = false;
    let mut npm_modules: Option<String> = None;

    let mut rest = args[2..].iter();
    while let Some(arg) = rest.next() {
        match arg.as_str() {
            "--out" => match rest.next() {
                Some(path) => out = Some(PathBuf::from(path)),
                None => {
                    eprintln!("--out needs a file path");
                    process::exit(2);
                }
            },
            "--debug" => debug = true,
            "--cache-all" => cache_all = true,
            "--npm-modules" => match rest.next() {
                Some(list) => npm_modules = Some(list.clone()),
                None => {
                    eprintln!("--npm-modules needs a module list");
                    process::exit(2);
                }
            },
            other => {
                eprintln!("Unknown argument: {}", other);
                process::exit(2);
            }
        }
    }

    let (mut directive, base_dir) = match read_directive(&input) {
        Ok(parts) => parts,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };
    directive.config.debug = directive.config.debug || debug;
    directive.config.cache_all = directive.config.cache_all || cache_all;
    if let Some(list) = npm_modules {
        for name in list.split(',') {
            let name = name.trim().to_string();
            if !name.is_empty() && !directive.config.is_known_module(&name) {
                directive.config.known_modules.push(name);
            }
        }
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Cannot start runtime: {}", e);
            process::exit(1);
        }
    };

    let result = runtime.block_on(async move {
        let transport: Arc<dyn Transport> = match base_dir {
            Some(dir) => Arc::new(DefaultTransport::new().with_base_dir(dir)),
            None => Arc::new(DefaultTransport::new()),
        };
        let store = Store::new(Arc::new(JsonFileStore::open(CACHE_FILE)));
        let importer = Arc::new(Importer::with_parts(
            directive.config.clone(),
            transport,
            store,
            Arc::new(NoopPrePass),
        ));
        let program = importer.run(&directive.entry).await?;
        importer.await_refreshes().await;
        Ok::<String, esimport::ImportError>(program)
    });

    match result {
        Ok(program) => {
            let host = match out {
                Some(path) => SinkHost::to_file(path),
                None => SinkHost::stdout(),
            };
            if let Err(e) = host.execute(&program) {
                eprintln!("{}", e);
                process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    }
}

/// An `.html` input carries the directive in its script tag; anything else
/// is taken as the entry path itself. Local entries resolve relative to the
/// page's directory (or the current directory).
fn read_directive(input: &str) -> Result<(EntryDirective, Option<PathBuf>), esimport::ImportError> {
    if input.ends_with(".html") || input.ends_with(".htm") {
        let html = fs::read_to_string(input)
            .map_err(|e| esimport::ImportError::io(input, e.to_string()))?;
        let directive = EntryDirective::from_html(&html)?;
        let base_dir = Path::new(input)
            .parent()
            .map(Path::to_path_buf)
            .filter(|p| !p.as_os_str().is_empty());
        return Ok((directive, base_dir.or_else(|| Some(PathBuf::from(".")))));
    }

    let directive = EntryDirective::new(input, ImporterConfig::default());
    let base_dir = if input.contains("http") {
        None
    } else {
        Some(PathBuf::from("."))
    };
    Ok((directive, base_dir))
}
