/* raplink
 *
 * Static linker and packager: catalogs relocatable ELF objects and ar
 * archives, gathers their symbols, and bundles everything into a single
 * compressed RAP application image for the target loader. Can also emit
 * a plain archive of the inputs or a text listing of the objects and
 * their unresolved references.
 *
 * Syntax: raplink [options] objects...
 *
 * -L <path>        Add <path> to the list of paths searched for input and library files
 * -l <name>        Find and link lib<name>.a from the search paths
 * -o <output>      Write the output to <output>, or a.rap if not specified
 * -T <config>      Read linker settings from toml configuration file <config>
 * -O <mode>        Output mode: application (default), archive or script
 *
 * --help           Display minimal usage information
 * --version        Display version information
 *
 * Set RUST_LOG=debug or trace for diagnostics of the cataloging and layout.
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

mod cmd;       /* command-line parser */
mod context;   /* describe the linking context */
mod config;    /* configuration file parser */
mod error;     /* error type shared across the linker */
mod path;      /* find files for the linking process */
mod files;     /* input naming and descriptor management */
mod archive;   /* parse and create ar archives */
mod object;    /* ELF object files, standalone or archived */
mod cache;     /* catalog of everything we were given */
mod elf;       /* ELF reader */
mod symbols;   /* symbol tables */
mod compress;  /* block compressor for the output stream */
mod rap;       /* RAP application image builder */
mod outputter; /* output format dispatch */

#[cfg(test)]
mod testelf;   /* assemble tiny ELF files for the test suite */

use context::StreamItem;
use error::{ Error, Result };
use symbols::SymbolTable;

fn main()
{
    env_logger::init();

    /* find out what needs to be done from command line arguments */
    let context = cmd::parse_args();

    if let Err(e) = run(&context)
    {
        eprintln!("raplink: {}", e);
        std::process::exit(1);
    }
}

fn run(context: &context::Context) -> Result<()>
{
    /* settings come from the configuration file, or defaults without one */
    let config = match context.get_config_file()
    {
        Some(filename) => config::parse_config(&filename)?,
        None => config::default_config()
    };

    let format = match context.get_format()
    {
        Some(format) => format,
        None => config.get_format()?
    };

    /* get a database ready of paths to search files for in. the environment
       can seed it with a separator-delimited list */
    let mut paths = path::Paths::new();
    if let Ok(list) = std::env::var("RAPLINK_PATH")
    {
        paths.add_list(&list);
    }

    let mut libs = Vec::new();
    let mut cache = cache::Cache::new();

    /* run through the stream of items from the command line */
    for item in context.stream_iter()
    {
        match item
        {
            StreamItem::SearchPath(p) => paths.add(&p),
            StreamItem::Library(l) => libs.push(l),
            StreamItem::File(f) =>
            {
                let found = paths.find_file(&f).ok_or_else(|| Error::NotFound(f.clone()))?;
                cache.add(&found)?;
            }
        }
    }

    /* catalog the positional inputs, then pull in the requested libraries */
    cache.open()?;
    let libraries = path::find_libraries(&libs, &paths)?;
    cache.add_libraries(&libraries)?;

    /* gather every global symbol on offer */
    let mut symbols = SymbolTable::new();
    cache.load_symbols(&mut symbols, false)?;

    log::info!("archives: {} objects: {} symbols: {}",
               cache.archive_count(), cache.object_count(), symbols.len());
    log::debug!("archives: {:?}", cache.get_archive_files());
    log::debug!("objects: {:?}", cache.get_object_files());
    log::debug!("exported:\n{}", symbols::output(&symbols));

    /* no resolver here: the dependents list stays empty and every cataloged
       positional object lands in the output */
    let dependents: Vec<&object::Object> = Vec::new();
    let output = context.get_output_file();

    match format
    {
        config::OutputFormat::Script =>
            outputter::script(&output, &dependents, &cache)?,
        config::OutputFormat::Archive =>
            outputter::archive(&output, &dependents, &cache)?,
        config::OutputFormat::Application =>
            outputter::application(&output, &dependents, &cache,
                                   config.get_init(), config.get_fini())?
    }

    cache.close();
    Ok(())
}
