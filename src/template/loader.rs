//! Filesystem template loading.

use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use minijinja::{Error, ErrorKind};
use tracing::{debug, trace};

use crate::cache::BytecodeCache;

use super::syntax::rewrite_cache_tags;

/// Resolves template names against an ordered list of directories.
#[derive(Debug, Clone, Default)]
pub struct TemplateLoader {
    directories: Vec<PathBuf>,
}

impl TemplateLoader {
    pub fn new<I, P>(directories: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            directories: directories.into_iter().map(Into::into).collect(),
        }
    }

    pub fn directories(&self) -> &[PathBuf] {
        &self.directories
    }

    /// Raw source of `name` from the first directory that has it.
    pub fn find_source(&self, name: &str) -> io::Result<Option<(PathBuf, String)>> {
        let Some(relative) = safe_relative_path(name) else {
            debug!(template = name, "rejecting template name outside the search path");
            return Ok(None);
        };

        for directory in &self.directories {
            let candidate = directory.join(&relative);
            match std::fs::read_to_string(&candidate) {
                Ok(source) => {
                    trace!(template = name, path = %candidate.display(), "template found");
                    return Ok(Some((candidate, source)));
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) if candidate.is_dir() => {
                    trace!(template = name, error = %err, "skipping directory");
                    continue;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }

    /// Source ready for compilation: tag-rewritten, served from `bytecode` when cached.
    pub fn load(
        &self,
        name: &str,
        bytecode: Option<&BytecodeCache>,
    ) -> Result<Option<String>, Error> {
        let Some((path, source)) = self.find_source(name).map_err(|err| {
            Error::new(
                ErrorKind::InvalidOperation,
                format!("could not read template `{name}`"),
            )
            .with_source(err)
        })?
        else {
            return Ok(None);
        };

        if let Some(compiled) = bytecode.and_then(|cache| cache.load(name, &source)) {
            return Ok(Some(compiled));
        }

        let compiled = rewrite_cache_tags(&source)
            .map_err(|err| {
                Error::new(
                    ErrorKind::SyntaxError,
                    format!("{err} in {}", path.display()),
                )
                .with_source(err)
            })?
            .into_owned();

        if let Some(cache) = bytecode {
            cache.store(name, &source, &compiled);
        }
        Ok(Some(compiled))
    }

    /// Loader callback for [`minijinja::Environment::set_loader`].
    pub(crate) fn into_callback(
        self,
        bytecode: Option<Arc<BytecodeCache>>,
    ) -> impl Fn(&str) -> Result<Option<String>, Error> + Send + Sync + 'static {
        move |name| self.load(name, bytecode.as_deref())
    }
}

/// `name` as a relative path, or `None` if it could escape the directory.
fn safe_relative_path(name: &str) -> Option<PathBuf> {
    if name.is_empty() || name.contains('\\') || name.contains('\0') {
        return None;
    }
    let path = Path::new(name);
    let mut relative = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (!relative.as_os_str().is_empty()).then_some(relative)
}
