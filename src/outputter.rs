/* raplink output dispatch
 *
 * Three ways out of the catalog: a plain text script listing the objects and
 * their unresolved symbols, a plain ar archive bundling the objects, or the
 * compressed RAP application image.
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use indexmap::IndexSet;

use crate::archive::Archive;
use crate::cache::Cache;
use crate::error::{ Error, Result };
use crate::files::{ FileName, Image };
use crate::object::Object;
use crate::rap;

/* the cache's positional objects followed by the dependents, duplicates
   dropped, order preserved */
fn collect<'a>(dependents: &[&'a Object], cache: &'a Cache) -> Result<Vec<&'a Object>>
{
    let mut seen = IndexSet::new();
    let mut objects = Vec::new();

    for obj in cache.get_objects()?.into_iter().chain(dependents.iter().copied())
    {
        if seen.insert(obj.name().full())
        {
            objects.push(obj);
        }
    }

    Ok(objects)
}

/* render the listing: each object's basename followed by its unresolved
   symbol references, numbered from one */
pub fn script_text(dependents: &[&Object], cache: &Cache) -> Result<String>
{
    let mut out = String::new();

    for obj in collect(dependents, cache)?
    {
        out.push_str(&format!("o:{}\n", obj.name().basename()));

        for (count, name) in obj.unresolved_symbols().keys().enumerate()
        {
            out.push_str(&format!(" u:{}:{}\n", count + 1, name));
        }
    }

    Ok(out)
}

/* write the listing to a file, tagged for the target shell */
pub fn script(name: &str, dependents: &[&Object], cache: &Cache) -> Result<()>
{
    log::info!("outputter script: {}", name);

    let text = format!("!# rap\n{}", script_text(dependents, cache)?);
    std::fs::write(name, text).map_err(|e| Error::open(name, e))
}

/* bundle the dependent objects into a plain ar archive */
pub fn archive(name: &str, dependents: &[&Object], cache: &Cache) -> Result<()>
{
    log::info!("outputter archive: {}", name);

    let objects = collect(dependents, cache)?;
    let archive = Archive::new(name)?;
    archive.create(&objects)
}

/* package the objects into the compressed RAP application image */
pub fn application(name: &str, dependents: &[&Object], cache: &Cache,
                   init: &str, fini: &str) -> Result<()>
{
    log::info!("outputter application: {}", name);

    let objects = collect(dependents, cache)?;

    let app = Image::new(FileName::from_path(name, false));
    app.open(true)?;
    let result = rap::write(&app, init, fini, &objects);
    app.close();
    result
}
