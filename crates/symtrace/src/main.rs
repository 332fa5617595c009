use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use symtrace_core::compress::{deflate, xz, zstd};
use symtrace_core::elf::{Class, ElfFile};
use symtrace_core::image::Image;
use symtrace_core::{Address, Result as SymtraceResult, Symbolizer, SymbolizerConfig, SymtraceError};
use symtrace_utils::{info, init_logging, init_logging_to_file, init_logging_with_level, LogFormat, LogLevel, LoggingGuard};

/// Upper bound for Zstandard output when the frame does not record its size.
const ZSTD_OUTPUT_LIMIT: usize = 1 << 30;

/// Inspect ELF images and symbolize addresses.
#[derive(Parser, Debug)]
#[command(name = "symtrace")]
#[command(version)]
#[command(about = "Inspect ELF images and symbolize addresses", long_about = None)]
struct Cli
{
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace); defaults to RUST_LOG or info
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Emit JSON logs
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// Symbolize addresses inside an ELF file
    Resolve
    {
        /// Executable, shared object or debug file
        file: PathBuf,
        /// Addresses to resolve (hex with 0x, or decimal)
        #[arg(required = true)]
        addresses: Vec<Address>,
        /// Load address of the file; addresses are file-relative when omitted
        #[arg(long, default_value = "0")]
        base: Address,
    },
    /// Print the ELF header facts and debug metadata of a file
    Inspect
    {
        /// File to inspect
        file: PathBuf,
    },
    /// Run one of the built-in decoders over a file
    Decompress
    {
        /// Compressed input
        input: PathBuf,
        /// Where to write the decoded bytes
        #[arg(short, long)]
        output: PathBuf,
        /// Compression format of the input
        #[arg(short, long, value_enum)]
        format: Format,
        /// Expected decoded size (required for zlib)
        #[arg(long)]
        size: Option<usize>,
    },
    /// List the modules loaded into this process
    Modules,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Format
{
    /// zlib stream, as in SHF_COMPRESSED sections
    Zlib,
    /// Legacy `.zdebug` section with its `ZLIB` header
    Zdebug,
    /// Zstandard frame
    Zstd,
    /// XZ container, as in `.gnu_debugdata`
    Xz,
}

fn main()
{
    let cli = Cli::parse();

    let _guard = match setup_logging(&cli) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = run_command(cli.command) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn setup_logging(cli: &Cli) -> Result<LoggingGuard, symtrace_utils::LoggingError>
{
    let format = if cli.json_logs { LogFormat::Json } else { LogFormat::Pretty };
    match (&cli.log_file, cli.log_level) {
        (Some(path), level) => init_logging_to_file(path, level, format),
        (None, Some(level)) => init_logging_with_level(level, format),
        (None, None) if cli.json_logs => init_logging_with_level(LogLevel::Info, format),
        (None, None) => init_logging(),
    }
}

fn run_command(command: Commands) -> SymtraceResult<()>
{
    match command {
        Commands::Resolve { file, addresses, base } => resolve(&file, &addresses, base),
        Commands::Inspect { file } => inspect(&file),
        Commands::Decompress {
            input,
            output,
            format,
            size,
        } => decompress(&input, &output, format, size),
        Commands::Modules => modules(),
    }
}

fn resolve(file: &Path, addresses: &[Address], base: Address) -> SymtraceResult<()>
{
    let config = SymbolizerConfig::from_env().with_track_modules(false);
    let symbolizer = Symbolizer::new(config);
    let summary = symbolizer.add_file(file, base.value())?;
    info!(
        "Loaded {} ({} symbols, dwarf: {})",
        summary.module, summary.symbols, summary.dwarf
    );

    for &address in addresses {
        let frame = symbolizer.resolve(address.value());
        println!("{address}: {frame}");
        // Outer frames of an inline chain, innermost already printed
        for outer in frame.frames.iter().skip(1) {
            let name = outer.function.as_ref().map_or("??", |name| name.display_name());
            match &outer.location {
                Some(location) => println!("    inlined into {name} at {location}"),
                None => println!("    inlined into {name}"),
            }
        }
    }
    Ok(())
}

fn inspect(path: &Path) -> SymtraceResult<()>
{
    let image = Image::open(path)?;
    let elf = ElfFile::parse(image.bytes())?;
    let scan = elf.scan()?;
    let header = elf.header();

    println!("File: {}", path.display());
    println!("  Class: {}", match header.class {
        Class::Elf32 => "ELF32",
        Class::Elf64 => "ELF64",
    });
    println!("  Endianness: {:?}", header.endian);
    println!("  Machine: {} ({:#x})", machine_name(header.machine), header.machine);
    println!("  Sections: {}", header.section_count);
    println!("  Section name table: {}", header.string_table_index);
    if let Some(extent) = elf.load_extent()? {
        println!("  Load extent: {:#x}..{:#x}", extent.start, extent.end);
    }

    println!("\nDebug metadata:");
    match &scan.build_id {
        Some(build_id) => println!("  Build-id: {build_id}"),
        None => println!("  Build-id: none"),
    }
    match &scan.debug_link {
        Some(link) => println!("  Debug link: {} (crc {:#010x})", link.name, link.crc),
        None => println!("  Debug link: none"),
    }
    match &scan.alt_link {
        Some(link) => println!("  Alt link: {} (build-id {})", link.path, link.build_id),
        None => println!("  Alt link: none"),
    }
    match scan.debug_data {
        Some(data) => println!("  Mini debug info: {} bytes", data.len()),
        None => println!("  Mini debug info: none"),
    }

    match &scan.symbols {
        Some(table) => {
            let entries = table.symbols.len();
            let source = if table.dynamic { ".dynsym" } else { ".symtab" };
            println!("  Symbol table: {entries} entries in {source}");
        }
        None => println!("  Symbol table: none"),
    }

    let compressed = scan.compressed_sections();
    if compressed.is_empty() {
        println!("  Compressed debug sections: none");
    } else {
        println!("  Compressed debug sections: {}", compressed.join(", "));
    }

    // Full load to report what the symbolizer would actually index
    let symbolizer = Symbolizer::new(SymbolizerConfig::from_env().with_track_modules(false));
    let summary = symbolizer.add_file(path, 0)?;
    println!("\nSymbolizer:");
    println!("  Indexed symbols: {}", summary.symbols);
    println!("  Line tables: {}", if summary.dwarf { "yes" } else { "no" });
    println!("  Mini debug info used: {}", if summary.minidebuginfo { "yes" } else { "no" });
    for companion in &summary.companions {
        println!("  Companion: {}", companion.display());
    }
    Ok(())
}

fn decompress(input: &Path, output: &Path, format: Format, size: Option<usize>) -> SymtraceResult<()>
{
    let data = fs::read(input).map_err(|source| SymtraceError::Open {
        path: input.to_path_buf(),
        source,
    })?;

    let decoded = match format {
        Format::Zlib => {
            let size = size.ok_or_else(|| SymtraceError::InvalidArgument("--size is required for zlib input".into()))?;
            deflate::inflate_zlib(&data, size)?
        }
        Format::Zdebug => deflate::inflate_zdebug(&data)?,
        Format::Zstd => match size {
            Some(size) => zstd::decompress(&data, size)?,
            None => zstd::decompress_bounded(&data, ZSTD_OUTPUT_LIMIT)?,
        },
        Format::Xz => xz::decompress(&data)?,
    };

    fs::write(output, &decoded)?;
    println!(
        "Decoded {} bytes into {} bytes at {}",
        data.len(),
        decoded.len(),
        output.display()
    );
    Ok(())
}

fn modules() -> SymtraceResult<()>
{
    let config = SymbolizerConfig::from_env().with_track_modules(true);
    let symbolizer = Symbolizer::for_current_process(config);

    // Any address inside this binary triggers the first enumeration
    let probe = main as fn() as usize as u64;
    if symbolizer.refresh(probe).is_none() {
        return Err(SymtraceError::InvalidArgument(
            "module tracking is not available on this platform".into(),
        ));
    }

    println!("{:<18} {:<18} Module", "Start", "End");
    for range in symbolizer.modules().iter().rev() {
        println!("{:<#18x} {:<#18x} {}", range.base, range.end, range.name);
    }

    println!("\nLoaded for symbolization:");
    for summary in symbolizer.loaded() {
        println!("  {} ({} symbols)", summary.module, summary.symbols);
    }
    println!("\nmain: {}", symbolizer.resolve(probe));
    Ok(())
}

fn machine_name(machine: u16) -> &'static str
{
    match machine {
        3 => "x86",
        8 => "MIPS",
        20 => "PowerPC",
        21 => "PowerPC64",
        40 => "ARM",
        62 => "x86-64",
        183 => "AArch64",
        243 => "RISC-V",
        _ => "unknown",
    }
}
