/* raplink command-line parser
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use crate::config;
use crate::context::{ Context, StreamItem };

/* use a state machine to analyze command line args */
enum State
{
    ExpectingAnything,
    ExpectingSearchPath,
    ExpectingLibrary,
    ExpectingOutputFile,
    ExpectingConfigFile,
    ExpectingFormat
}

/* convert command-line arguments into a native context structure */
pub fn parse_args() -> Context
{
    /* get the command-line arguments as a list of strings, skipping
       the first argument because it's just the program name */
    let args = std::env::args().collect::<Vec<String>>().split_off(1);
    if args.is_empty()
    {
        /* no arguments? bail out with a message hinting at what we'd expect */
        usage_die();
    }

    parse_list(&args)
}

fn parse_list(args: &[String]) -> Context
{
    let mut context = Context::new();
    let mut state = State::ExpectingAnything;

    for arg in args
    {
        match state
        {
            /* argument could be an input file or a switch. figure out
               which it is, and either change state to handle the switch
               or include the file in the processing stream */
            State::ExpectingAnything =>
            {
                match parse_single_arg(arg)
                {
                    (true, Some(s)) => state = s,
                    (false, None) => context.add_to_stream(StreamItem::File(arg.clone())),
                    (_, _) => ()
                }
            },

            /* the argument is expected to be a search path */
            State::ExpectingSearchPath =>
            {
                context.add_to_stream(StreamItem::SearchPath(arg.clone()));
                state = State::ExpectingAnything;
            },

            /* the argument is expected to be a library name to find */
            State::ExpectingLibrary =>
            {
                context.add_to_stream(StreamItem::Library(arg.clone()));
                state = State::ExpectingAnything;
            },

            /* the argument is expected to be the output filename */
            State::ExpectingOutputFile =>
            {
                context.set_output_file(arg);
                state = State::ExpectingAnything;
            },

            /* the argument is expected to be the config file filename */
            State::ExpectingConfigFile =>
            {
                context.set_config_file(arg);
                state = State::ExpectingAnything;
            },

            /* the argument is expected to be an output mode name */
            State::ExpectingFormat =>
            {
                match config::format_from(arg)
                {
                    Ok(format) => context.set_format(format),
                    Err(e) => fatal_die(&format!("{}", e))
                }
                state = State::ExpectingAnything;
            }
        }
    }

    context
}

/* attempt to parse a single argument and return whether or not the arg
   was successfully parsed, and the new state of the parser */
fn parse_single_arg(arg: &String) -> (bool, Option<State>)
{
    /* display minimal help and exit */
    if arg == "--help" { usage_die() }

    /* display version information */
    if arg == "--version" { version_die() }

    /* next command line argument must be a search path */
    if arg == "-L" { return (true, Some(State::ExpectingSearchPath)) }

    /* next command line argument must be a library name */
    if arg == "-l" { return (true, Some(State::ExpectingLibrary)) }

    /* next command line argument must be an output file name */
    if arg == "-o" { return (true, Some(State::ExpectingOutputFile)) }

    /* next command line argument must be the config filename */
    if arg == "-T" { return (true, Some(State::ExpectingConfigFile)) }

    /* next command line argument must be the output mode */
    if arg == "-O" { return (true, Some(State::ExpectingFormat)) }

    (false, None) /* nothing handled and no change to state */
}

/* software information and error messages */
fn version_die() -> !
{
    eprintln!("raplink {}", env!("CARGO_PKG_VERSION"));
    std::process::exit(1);
}

fn usage_die() -> !
{
    eprintln!("Usage: raplink [options] <file>...");
    eprintln!(" -L <path>    add <path> to the library search paths");
    eprintln!(" -l <name>    link lib<name>.a from the search paths");
    eprintln!(" -o <output>  write the output to <output> (default a.rap)");
    eprintln!(" -T <config>  read linker settings from <config>");
    eprintln!(" -O <mode>    output mode: application, archive or script");
    std::process::exit(1);
}

fn fatal_die(message: &str) -> !
{
    eprintln!("raplink: {}", message);
    std::process::exit(1);
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::config::OutputFormat;

    fn args(list: &[&str]) -> Vec<String>
    {
        list.iter().map(|a| String::from(*a)).collect()
    }

    #[test]
    fn switches_and_files_interleave()
    {
        let context = parse_list(&args(&["-o", "x.rap", "-L", "/lib", "a.o", "-l", "m", "b.o"]));

        assert_eq!(context.get_output_file(), "x.rap");

        let mut files = Vec::new();
        let mut paths = Vec::new();
        let mut libs = Vec::new();
        for item in context.stream_iter()
        {
            match item
            {
                StreamItem::File(f) => files.push(f),
                StreamItem::SearchPath(p) => paths.push(p),
                StreamItem::Library(l) => libs.push(l)
            }
        }

        assert_eq!(files, vec!["a.o", "b.o"]);
        assert_eq!(paths, vec!["/lib"]);
        assert_eq!(libs, vec!["m"]);
    }

    #[test]
    fn format_switch_overrides()
    {
        let context = parse_list(&args(&["-O", "script", "a.o"]));
        assert_eq!(context.get_format(), Some(OutputFormat::Script));

        let context = parse_list(&args(&["a.o"]));
        assert_eq!(context.get_format(), None);
    }
}
