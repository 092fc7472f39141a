/* raplink input catalog
 *
 * The cache classifies every user-supplied path as an archive or an object,
 * owns whatever it finds, and drives bulk open/close and symbol loading.
 * Member objects are keyed by their full "<archive>:<object>@<offset>" name;
 * standalone objects by their path. Objects are declared before archives so
 * they drop first: members hold non-owning handles to their archive.
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use std::rc::Rc;

use indexmap::IndexMap;

use crate::archive::Archive;
use crate::error::{ Error, Result };
use crate::files::FileName;
use crate::object::Object;
use crate::symbols::SymbolTable;

pub struct Cache
{
    paths: Vec<String>,                      /* inputs in supplied order, duplicates kept */
    objects: IndexMap<String, Object>,
    archives: IndexMap<String, Rc<Archive>>,
    opened: bool
}

impl Cache
{
    pub fn new() -> Cache
    {
        Cache
        {
            paths: Vec::new(),
            objects: IndexMap::new(),
            archives: IndexMap::new(),
            opened: false
        }
    }

    /* record an input path. once the cache is open, new paths are classified
       immediately */
    pub fn add(&mut self, path: &str) -> Result<()>
    {
        self.paths.push(String::from(path));
        self.input(path)
    }

    pub fn add_paths(&mut self, paths: &[String]) -> Result<()>
    {
        for path in paths
        {
            self.add(path)?;
        }
        Ok(())
    }

    /* feed library archives through classification without recording them as
       positional inputs, so they never perturb get_objects ordering */
    pub fn add_libraries(&mut self, paths: &[String]) -> Result<()>
    {
        for path in paths
        {
            self.input(path)?;
        }
        Ok(())
    }

    fn input(&mut self, path: &str) -> Result<()>
    {
        if self.opened
        {
            self.collect_object_files(path)?;
            self.archive_begin(path)?;
        }
        Ok(())
    }

    /* classify everything recorded so far and bring the archives up */
    pub fn open(&mut self) -> Result<()>
    {
        if !self.opened
        {
            let paths = self.paths.clone();
            for path in &paths
            {
                self.collect_object_files(path)?;
            }
            self.archives_begin()?;
            self.opened = true;
        }
        Ok(())
    }

    /* tear down: objects go first, they may reference archives */
    pub fn close(&mut self)
    {
        if self.opened
        {
            self.objects.clear();
            self.archives_end();
            self.archives.clear();
            self.opened = false;
        }
    }

    /* decide what one path is. a file with the ar identifier becomes an
       archive and its members are enumerated; anything else must be an
       existing object file that parses as ELF */
    fn collect_object_files(&mut self, path: &str) -> Result<()>
    {
        let archive = Archive::new(path)?;

        if archive.is_valid()?
        {
            let archive = Rc::new(archive);
            archive.open(false)?;
            let result = Archive::load_objects(&archive, &mut self.objects);
            archive.close();
            result?;
            self.archives.insert(String::from(path), archive);
        }
        else
        {
            let object = Object::new(path)?;
            if !object.name().exists()
            {
                return Err(Error::NotFound(String::from(path)));
            }

            /* round-trip the ELF session as validation */
            object.open()?;
            let result = (|| { object.begin()?; object.end(); Ok(()) })();
            object.close();
            result?;

            self.objects.insert(String::from(path), object);
        }

        Ok(())
    }

    fn archive_begin(&self, path: &str) -> Result<()>
    {
        if let Some(archive) = self.archives.get(path)
        {
            if !archive.is_open()
            {
                log::trace!("cache archive begin: {}", path);
                archive.open(false)?;
                if let Err(e) = archive.begin()
                {
                    archive.close();
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn archive_end(&self, path: &str)
    {
        if let Some(archive) = self.archives.get(path)
        {
            if archive.is_open()
            {
                log::trace!("cache archive end: {}", path);
                archive.end();
                archive.close();
            }
        }
    }

    fn archives_begin(&self) -> Result<()>
    {
        for path in self.archives.keys()
        {
            self.archive_begin(path)?;
        }
        Ok(())
    }

    fn archives_end(&self)
    {
        let paths: Vec<String> = self.archives.keys().cloned().collect();
        for path in paths
        {
            self.archive_end(&path);
        }
    }

    /* load every object's symbols into the shared table, round-tripping each
       object's descriptor and ELF session */
    pub fn load_symbols(&self, symbols: &mut SymbolTable, local: bool) -> Result<()>
    {
        for obj in self.objects.values()
        {
            obj.open()?;
            let result = (||
            {
                obj.begin()?;
                let loaded = obj.load_symbols(symbols, local);
                obj.end();
                loaded
            })();
            obj.close();
            result?;
        }
        Ok(())
    }

    /* the objects behind the positional inputs, in the order they were
       supplied. every input path must have classified as an object */
    pub fn get_objects(&self) -> Result<Vec<&Object>>
    {
        let mut list = Vec::new();
        for path in &self.paths
        {
            match self.objects.get(path)
            {
                Some(obj) => list.push(obj),
                None => return Err(Error::Internal(format!("path {} not found in objects", path)))
            }
        }
        Ok(list)
    }

    /* every cataloged object, archive members included, in insertion order */
    pub fn objects(&self) -> impl Iterator<Item = &Object>
    {
        self.objects.values()
    }

    pub fn archive_count(&self) -> usize
    {
        self.archives.len()
    }

    pub fn object_count(&self) -> usize
    {
        self.objects.len()
    }

    pub fn path_count(&self) -> usize
    {
        self.paths.len()
    }

    pub fn get_archive_files(&self) -> Vec<String>
    {
        self.archives.values().map(|a| a.name().full()).collect()
    }

    pub fn get_object_files(&self) -> Vec<FileName>
    {
        self.objects.values().map(|o| o.name().clone()).collect()
    }
}

impl Drop for Cache
{
    fn drop(&mut self)
    {
        self.close();
    }
}
