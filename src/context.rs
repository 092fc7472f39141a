/* Centralize all the context we can about a particular linking task
 *
 * The order of files on the command line is important, so store
 * the command line arguments as a stream of items we'll step through
 * one at a time
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use crate::config::OutputFormat;

pub type Filename = String;

/* we have to handle a stream of input items: search paths, libraries to
   find, and object or archive files to catalog */
#[derive(Clone)]
pub enum StreamItem
{
    File(Filename),
    SearchPath(Filename),
    Library(Filename)
}

/* this is what we're working with: a collection of files to process */
#[derive(Clone)]
pub struct Context
{
    output_file: Filename,                 /* this can be set at any time */
    config_file: Option<Filename>,         /* this can be set at any time */
    format: Option<OutputFormat>,          /* -O overrides the config file */
    input_stream: Vec<StreamItem>          /* a list of streamed items to process */
}

impl Context
{
    pub fn new() -> Context
    {
        Context
        {
            /* the default output is a compressed application package */
            output_file: String::from("a.rap"),

            /* leave the rest blank */
            config_file: None,
            format: None,
            input_stream: Vec::new()
        }
    }

    /* functions to update and access the link context */
    pub fn add_to_stream(&mut self, item: StreamItem)
    {
        self.input_stream.push(item);
    }

    pub fn set_output_file(&mut self, path: &str)
    {
        self.output_file = String::from(path);
    }

    pub fn set_config_file(&mut self, path: &str)
    {
        self.config_file = Some(String::from(path));
    }

    pub fn set_format(&mut self, format: OutputFormat)
    {
        self.format = Some(format);
    }

    pub fn get_output_file(&self) -> String { self.output_file.clone() }
    pub fn get_config_file(&self) -> Option<String> { self.config_file.clone() }
    pub fn get_format(&self) -> Option<OutputFormat> { self.format }

    pub fn stream_iter(&self) -> ActionIter
    {
        ActionIter::new(self)
    }
}

/* provide an iterator of actions the linker needs to perform */
pub struct ActionIter<'a>
{
    /* treat this as a stream of tasks */
    stream: std::slice::Iter<'a, StreamItem>
}

impl ActionIter<'_>
{
    pub fn new(context: &Context) -> ActionIter
    {
        ActionIter { stream: context.input_stream.iter() }
    }
}

impl Iterator for ActionIter<'_>
{
    type Item = StreamItem;

    fn next(&mut self) -> Option<StreamItem>
    {
        self.stream.next().cloned()
    }
}
