/// aotinline - Inlining Scheduler CLI
use aotinline::program::Program;
use aotinline::queue::{CompileQueue, SizeEstimateBackend};
use aotinline::InliningConfig;
use std::env;
use std::path::Path;
use std::process;
use tracing::Level;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_usage() {
    eprintln!("aotinline v{}", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    aotinline [OPTIONS] <PROGRAM>");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    -h, --help              Print this help message");
    eprintln!("    --version               Print version information");
    eprintln!("    -c, --config <FILE>     Read inlining knobs from a TOML file");
    eprintln!("    --preset <NAME>         Start from a preset: default, conservative, aggressive");
    eprintln!("    -j, --threads <N>       Worker threads (0 = one per CPU)");
    eprintln!("    --histogram             Print the per-method histogram");
    eprintln!("    --dump-config           Print the effective configuration and exit");
    eprintln!("    -v, -vv, -vvv           Log at info, debug or trace level");
    eprintln!();
    eprintln!("ARGUMENTS:");
    eprintln!("    <PROGRAM>               TOML program description");
    eprintln!();
    eprintln!("EXAMPLES:");
    eprintln!("    aotinline program.toml");
    eprintln!("    aotinline -c inlining.toml --histogram program.toml");
    eprintln!("    aotinline --preset aggressive -j 4 -vv program.toml");
}

fn print_version() {
    println!("aotinline {}", VERSION);
}

struct Options {
    program: Option<String>,
    config: Option<String>,
    preset: Option<String>,
    threads: Option<usize>,
    histogram: bool,
    dump_config: bool,
    verbosity: u8,
}

fn parse_args() -> Result<Options, String> {
    let args: Vec<String> = env::args().collect();

    let mut options = Options {
        program: None,
        config: None,
        preset: None,
        threads: None,
        histogram: false,
        dump_config: false,
        verbosity: 0,
    };
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage();
                process::exit(0);
            }
            "--version" => {
                print_version();
                process::exit(0);
            }
            "-c" | "--config" => {
                i += 1;
                let path = args.get(i).ok_or("Missing file after --config")?;
                options.config = Some(path.clone());
            }
            "--preset" => {
                i += 1;
                let name = args.get(i).ok_or("Missing name after --preset")?;
                options.preset = Some(name.clone());
            }
            "-j" | "--threads" => {
                i += 1;
                let count = args.get(i).ok_or("Missing count after --threads")?;
                let count = count
                    .parse()
                    .map_err(|_| format!("Invalid thread count: {}", count))?;
                options.threads = Some(count);
            }
            "--histogram" => options.histogram = true,
            "--dump-config" => options.dump_config = true,
            "-v" => options.verbosity += 1,
            "-vv" => options.verbosity += 2,
            "-vvv" => options.verbosity += 3,
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            arg => {
                if options.program.is_some() {
                    return Err("Multiple program files specified".to_string());
                }
                options.program = Some(arg.to_string());
            }
        }
        i += 1;
    }

    Ok(options)
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .with_target(true)
        .init();
}

fn load_config(options: &Options) -> Result<InliningConfig, String> {
    let mut config = match (&options.config, options.preset.as_deref()) {
        (Some(_), Some(_)) => return Err("--config and --preset are mutually exclusive".to_string()),
        (Some(path), None) => InliningConfig::load(Path::new(path)).map_err(|e| e.to_string())?,
        (None, None) | (None, Some("default")) => InliningConfig::default(),
        (None, Some("conservative")) => InliningConfig::conservative(),
        (None, Some("aggressive")) => InliningConfig::aggressive(),
        (None, Some(other)) => return Err(format!("Unknown preset: {}", other)),
    };
    if let Some(threads) = options.threads {
        config.threads = threads;
    }
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn run(options: Options) -> Result<(), String> {
    let config = load_config(&options)?;
    if options.dump_config {
        let rendered = toml::to_string(&config).map_err(|e| e.to_string())?;
        print!("{}", rendered);
        return Ok(());
    }

    let path = options.program.ok_or("No program file specified")?;
    let program = Program::load(Path::new(&path)).map_err(|e| e.to_string())?;
    let (universe, parser) = program.build().map_err(|e| e.to_string())?;
    let queue = CompileQueue::new(
        universe,
        parser.clone(),
        parser,
        SizeEstimateBackend::default(),
        config,
    )
    .map_err(|e| e.to_string())?;
    let summary = queue.finish().map_err(|e| e.to_string())?;

    println!("Parsed:              {} methods", summary.parsed);
    println!(
        "Trivial phase:       {} rounds, {} graphs published",
        summary.schedule.trivial.round_count(),
        summary.schedule.trivial.total_published()
    );
    println!(
        "Non-trivial phase:   {} rounds, {} graphs published",
        summary.schedule.non_trivial.round_count(),
        summary.schedule.non_trivial.total_published()
    );
    println!(
        "Compiled:            {} methods, {} bytes",
        summary.compiled,
        summary.histogram.total_code_size()
    );
    if options.histogram {
        println!();
        println!("{}", summary.histogram);
    }
    Ok(())
}

fn main() {
    let options = match parse_args() {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            process::exit(1);
        }
    };

    init_logging(options.verbosity);

    if let Err(e) = run(options) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
