//! URL-prefix routing.

use netforge_core::{ErrorCode, Result, net_error};

use crate::parser::Request;
use crate::response::ResponseBuilder;

/// A request handler bound to a URL prefix.
///
/// Returning an error with code `NotHandled` passes the request on to
/// the next matching route.
pub trait Route: Send + Sync {
    fn handle(&self, req: &Request<'_>, res: &mut ResponseBuilder) -> Result<()>;
}

impl<F> Route for F
where
    F: Fn(&Request<'_>, &mut ResponseBuilder) -> Result<()> + Send + Sync,
{
    fn handle(&self, req: &Request<'_>, res: &mut ResponseBuilder) -> Result<()> {
        self(req, res)
    }
}

/// Ordered route table. The first matching route wins; routes may defer
/// with `NotHandled`.
#[derive(Default)]
pub struct Router {
    routes: Vec<(String, Box<dyn Route>)>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, url_path: &str, route: Box<dyn Route>) {
        self.routes.push((url_path.to_owned(), route));
    }

    pub fn add_fn(
        &mut self,
        url_path: &str,
        handler: impl Fn(&Request<'_>, &mut ResponseBuilder) -> Result<()> + Send + Sync + 'static,
    ) {
        self.add(url_path, Box::new(handler));
    }

    /// Dispatches `req`; `NotHandled` when no route took it.
    pub fn handle(&self, req: &Request<'_>, res: &mut ResponseBuilder) -> Result<()> {
        for (url_path, route) in &self.routes {
            if !Self::matches(req.path, url_path) {
                continue;
            }
            match route.handle(req, res) {
                Err(e) if e.is_not_handled() => {}
                other => return other,
            }
        }
        Err(net_error!(ErrorCode::NotHandled, "no route for {}", req.path))
    }

    /// A route matches on path equality, or as a proper prefix when it
    /// ends in `/`. `/foo/` takes `/foo/bar`; `/foo` does not take
    /// `/foobar`.
    fn matches(path: &str, rt_path: &str) -> bool {
        path == rt_path || (rt_path.ends_with('/') && path.starts_with(rt_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_rules() {
        assert!(Router::matches("/foo", "/foo"));
        assert!(Router::matches("/foo/bar", "/foo/"));
        assert!(Router::matches("/foo/", "/foo/"));
        assert!(!Router::matches("/foobar", "/foo"));
        assert!(!Router::matches("/foo", "/foo/"));
        assert!(Router::matches("/anything", "/"));
    }
}
