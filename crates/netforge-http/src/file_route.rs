//! Static file serving below a filesystem root.

use std::fs::File;
use std::path::PathBuf;

use netforge_core::{ErrorCode, Result, net_error};
use netforge_net::FileEmitter;
use tracing::debug;

use crate::parser::Request;
use crate::response::{ResponseBuilder, ResponseMode};
use crate::router::Route;
use crate::header;

/// Serves regular files from `fs_root` for paths below `url_prefix`.
///
/// The request path is resolved on the filesystem; anything escaping the
/// canonicalized root (e.g. through `..` segments) is refused.
pub struct FileRoute {
    url_prefix: String,
    root: PathBuf,
}

impl FileRoute {
    pub fn new(url_prefix: &str, fs_root: &str) -> Result<Self> {
        let root = std::fs::canonicalize(fs_root)
            .map_err(|e| net_error!(ErrorCode::NotFound, "file root {fs_root}: {e}"))?;
        Ok(Self { url_prefix: url_prefix.to_owned(), root })
    }

    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let suffix = path.strip_prefix(&self.url_prefix)?.trim_start_matches('/');
        let resolved = std::fs::canonicalize(self.root.join(suffix)).ok()?;
        resolved.starts_with(&self.root).then_some(resolved)
    }
}

impl Route for FileRoute {
    fn handle(&self, req: &Request<'_>, res: &mut ResponseBuilder) -> Result<()> {
        let Some(file_path) = self.resolve(req.path) else {
            return Err(net_error!(ErrorCode::NotFound, "no file for {}", req.path));
        };

        let file = File::open(&file_path)
            .map_err(|e| net_error!(ErrorCode::NotFound, "{}: {e}", file_path.display()))?;
        let meta = file
            .metadata()
            .map_err(|e| net_error!(ErrorCode::NotFound, "{}: {e}", file_path.display()))?;
        if !meta.is_file() {
            return Err(net_error!(ErrorCode::NotFound, "not a regular file"));
        }

        debug!(path = %file_path.display(), "serving file");
        res.begin(ResponseMode::Fixed, 200)?;
        res.header(header::CONTENT_TYPE, mime_for(&file_path))?;
        res.body_emitter(Box::new(FileEmitter::new(file)?))?;
        res.end()
    }
}

fn mime_for(path: &std::path::Path) -> &'static str {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    match ext.to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "text/javascript",
        "json" => "application/json",
        "txt" => "text/plain",
        "xml" => "application/xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "pdf" => "application/pdf",
        "wasm" => "application/wasm",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn route_with_tree() -> (tempfile::TempDir, FileRoute) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let mut f = File::create(dir.path().join("sub/page.html")).unwrap();
        f.write_all(b"<html></html>").unwrap();
        let route = FileRoute::new("/files/", dir.path().to_str().unwrap()).unwrap();
        (dir, route)
    }

    #[test]
    fn resolves_files_below_root() {
        let (_dir, route) = route_with_tree();
        assert!(route.resolve("/files/sub/page.html").is_some());
        assert!(route.resolve("/files/missing.html").is_none());
    }

    #[test]
    fn rejects_escape_from_root() {
        let (_dir, route) = route_with_tree();
        assert!(route.resolve("/files/../../../etc/passwd").is_none());
        assert!(route.resolve("/files/sub/../../..").is_none());
    }

    #[test]
    fn mime_lookup() {
        assert_eq!(mime_for(std::path::Path::new("a/b.html")), "text/html");
        assert_eq!(mime_for(std::path::Path::new("a/b.unknown")), "application/octet-stream");
    }
}
