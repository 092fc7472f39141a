/* raplink configuration file parser
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use serde_derive::Deserialize;

use crate::error::{ Error, Result };

/* the output modes the dispatcher understands */
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OutputFormat
{
    Script,
    Archive,
    Application
}

/* map a mode name from the config file or the -O switch */
pub fn format_from(name: &str) -> Result<OutputFormat>
{
    match name
    {
        "script" => Ok(OutputFormat::Script),
        "archive" => Ok(OutputFormat::Archive),
        "application" => Ok(OutputFormat::Application),
        other => Err(Error::Config(format!("unknown output format '{}'", other)))
    }
}

#[derive(Clone)]
#[derive(Deserialize)]
pub struct Config
{
    output: Output
}

#[derive(Clone)]
#[derive(Deserialize)]
pub struct Output
{
    format: Option<String>,
    init: Option<String>,
    fini: Option<String>
}

impl Config
{
    pub fn get_format(&self) -> Result<OutputFormat>
    {
        match &self.output.format
        {
            Some(name) => format_from(name),
            None => Ok(OutputFormat::Application)
        }
    }

    /* entry points the loader calls around the application's lifetime */
    pub fn get_init(&self) -> &str
    {
        self.output.init.as_deref().unwrap_or("_init")
    }

    pub fn get_fini(&self) -> &str
    {
        self.output.fini.as_deref().unwrap_or("_fini")
    }
}

/* load the given file and parse it, returning a config structure */
pub fn parse_config(filename: &str) -> Result<Config>
{
    let contents = std::fs::read_to_string(filename)
        .map_err(|e| Error::Config(format!("can't read {}: {}", filename, e)))?;

    toml::from_str(&contents)
        .map_err(|e| Error::Config(format!("can't parse {}: {}", filename, e)))
}

/* absent a configuration file, these defaults apply */
pub fn default_config() -> Config
{
    Config
    {
        output: Output
        {
            format: None,
            init: None,
            fini: None
        }
    }
}
