/* raplink symbol management
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use std::collections::BTreeMap;

/* one ELF symbol lifted out of an object file */
#[derive(Clone)]
pub struct Symbol
{
    name: String,
    object: String,  /* full name of the defining object, empty if unknown */
    value: u64,
    size: u64,
    info: u8,        /* ELF st_info: binding in the high nibble, type in the low */
    section: usize   /* defining section index within the object */
}

impl Symbol
{
    pub fn new(name: &str, object: &str, value: u64, size: u64, info: u8, section: usize) -> Symbol
    {
        Symbol
        {
            name: String::from(name),
            object: String::from(object),
            value, size, info, section
        }
    }

    /* an unresolved symbol has no defining object */
    pub fn unresolved(name: &str, info: u8) -> Symbol
    {
        Symbol::new(name, "", 0, 0, info, 0)
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn object(&self) -> &str { &self.object }
    pub fn value(&self) -> u64 { self.value }
    pub fn size(&self) -> u64 { self.size }
    pub fn info(&self) -> u8 { self.info }
    pub fn section_index(&self) -> usize { self.section }

    pub fn symbol_type(&self) -> u8
    {
        self.info & 0xf
    }

    pub fn binding(&self) -> u8
    {
        self.info >> 4
    }
}

impl std::fmt::Debug for Symbol
{
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result
    {
        write!(f, "{} (t:{} b:{} v:{:#x} s:{})",
               self.name, self.symbol_type(), self.binding(), self.value, self.size)
    }
}

/* symbols keyed and ordered by name */
pub type SymbolTable = BTreeMap<String, Symbol>;

/* render a table for listings and diagnostics, one symbol per line */
pub fn output(table: &SymbolTable) -> String
{
    let mut listing = String::new();
    for (name, symbol) in table
    {
        listing.push_str(&format!(" {} {:?}\n", name, symbol));
    }
    listing
}
