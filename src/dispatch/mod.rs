//! Path-routing application with a middleware stack.
//!
//! [`Dispatcher`] is the application the `pollserve` binary serves. For
//! each request it:
//!
//! 1. builds a [`Request`] from the environ,
//! 2. gives each middleware, in order, the chance to answer early,
//! 3. otherwise calls the view of the first route whose pattern matches
//!    the path (404 if none),
//! 4. lets every middleware, in reverse order, adjust the response,
//! 5. starts the response with `"<code> <reason>"` and the response's
//!    content type, and returns the rendered body.

mod request;
mod response;

pub use request::Request;
pub use response::{reason_phrase, HttpResponse, InvalidStatus};

use crate::application::{AppResult, Application, StartResponse};
use crate::http::Environ;
use regex::Regex;
use serde::Serialize;
use serde_json::ser::{Formatter, Serializer};
use std::io;
use tracing::{debug, warn};

/// A request handler bound to a path.
pub type View = fn(&Request) -> HttpResponse;

/// Hooks run around every view.
pub trait Middleware {
    /// Return a response to skip routing.
    fn on_request(&self, _request: &Request) -> Option<HttpResponse> {
        None
    }

    fn on_response(&self, _request: &Request, _response: &mut HttpResponse) {}
}

/// Logs each routed request at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingMiddleware;

impl Middleware for LoggingMiddleware {
    fn on_response(&self, request: &Request, response: &mut HttpResponse) {
        debug!(
            "{} {} - {} {}",
            request.method,
            request.path,
            response.status(),
            response.reason_phrase()
        );
    }
}

/// Ordered table of path patterns.
///
/// A pattern matches anywhere in the path unless anchored, so exact
/// routes are written `^/test$`.
#[derive(Default, Clone)]
pub struct Router {
    routes: Vec<(Regex, View)>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a route. Earlier routes win when several match.
    pub fn route(mut self, pattern: &str, view: View) -> Result<Self, regex::Error> {
        self.routes.push((Regex::new(pattern)?, view));
        Ok(self)
    }

    pub fn resolve(&self, path: &str) -> Option<View> {
        self.routes
            .iter()
            .find(|(pattern, _)| pattern.is_match(path))
            .map(|(_, view)| *view)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Routes requests to views through a fixed middleware stack.
#[derive(Default)]
pub struct Dispatcher {
    router: Router,
    middleware: Vec<Box<dyn Middleware>>,
}

impl Dispatcher {
    pub fn new(router: Router, middleware: Vec<Box<dyn Middleware>>) -> Self {
        Self { router, middleware }
    }

    /// The demo site: `/test` answers `{"status": 0}`, with request logging.
    pub fn demo() -> Result<Self, regex::Error> {
        Ok(Self::new(
            Router::new().route(r"^/test$", status_view)?,
            vec![Box::new(LoggingMiddleware)],
        ))
    }

    /// Run the middleware stack and the routed view for `request`.
    pub fn respond(&self, request: &Request) -> HttpResponse {
        let early = self
            .middleware
            .iter()
            .find_map(|m| m.on_request(request));

        let mut response = match early {
            Some(response) => response,
            None => match self.router.resolve(&request.path) {
                Some(view) => view(request),
                None => not_found(request),
            },
        };

        for middleware in self.middleware.iter().rev() {
            middleware.on_response(request, &mut response);
        }
        response
    }
}

impl Application for Dispatcher {
    fn call(&mut self, environ: &Environ, start: &mut StartResponse) -> AppResult {
        let request = Request::from_environ(environ);
        let response = self.respond(&request);
        start.start(response.status_line(), response.headers());
        Ok(response.render())
    }
}

fn not_found(request: &Request) -> HttpResponse {
    HttpResponse::not_found(format!("Not Found: {}", request.path))
}

/// `GET /test` on the demo site.
pub fn status_view(_request: &Request) -> HttpResponse {
    match to_spaced_json(&serde_json::json!({ "status": 0 })) {
        Ok(body) => HttpResponse::new(body),
        Err(e) => {
            warn!(error = %e, "Failed to serialize view body");
            HttpResponse::server_error("")
        }
    }
}

/// JSON with `", "` and `": "` separators, e.g. `{"status": 0}`.
pub fn to_spaced_json<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<Vec<u8>> {
    let mut serializer = Serializer::with_formatter(Vec::new(), SpacedFormatter);
    value.serialize(&mut serializer)?;
    Ok(serializer.into_inner())
}

struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }
}
