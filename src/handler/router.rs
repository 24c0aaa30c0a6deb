//! Request routing dispatch module
//!
//! Entry point for HTTP request processing: method validation, ordered route
//! matching, dispatch, and access logging.

use crate::config::AppState;
use crate::handler::static_files;
use crate::http;
use crate::logger;
use http_body_util::Full;
use hyper::body::{Body, Bytes};
use hyper::{Method, Request, Response, Version};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

/// Request context encapsulating information needed for request processing
pub struct RequestContext<'a> {
    pub path: &'a str,
    pub is_head: bool,
    pub if_none_match: Option<String>,
}

/// Matched route
#[derive(Debug, PartialEq, Eq)]
pub enum Route<'a> {
    /// Image route, confined to the image directory
    Image { filename: &'a str },
    /// Catch-all, `/` included
    Root,
}

/// Match a request path against the ordered route table
///
/// First match wins; the image prefix is checked before the catch-all.
pub fn match_route<'a>(path: &'a str, images_dir: &str) -> Route<'a> {
    let image_prefix = format!("/{images_dir}/");
    if let Some(filename) = path.strip_prefix(image_prefix.as_str()) {
        return Route::Image { filename };
    }
    Route::Root
}

/// Main entry point for HTTP request handling
pub async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
    peer_addr: SocketAddr,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let started = Instant::now();

    let method = req.method().clone();
    let is_head = method == Method::HEAD;
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(ToString::to_string);
    let http_version = version_label(req.version());
    let referer = header_string(&req, "referer");
    let user_agent = header_string(&req, "user-agent");
    let if_none_match = header_string(&req, "if-none-match");

    // 1. Check HTTP method
    let response = if let Some(resp) = check_http_method(&method, state.config.http.enable_cors) {
        resp
    // 2. Check declared body size
    } else if let Some(resp) = check_body_size(&req, state.config.http.max_body_size) {
        resp
    // 3. Dispatch through the route table
    } else {
        let ctx = RequestContext {
            path: &path,
            is_head,
            if_none_match,
        };
        dispatch(&ctx, &state).await
    };

    if state.config.logging.access_log {
        let mut entry =
            logger::AccessLogEntry::new(peer_addr.ip().to_string(), method.to_string(), path);
        entry.query = query;
        entry.http_version = http_version;
        entry.status = response.status().as_u16();
        entry.body_bytes =
            usize::try_from(response.body().size_hint().exact().unwrap_or(0)).unwrap_or(0);
        entry.referer = referer;
        entry.user_agent = user_agent;
        entry.request_time_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
        logger::log_access(&entry, &state.config.logging.access_log_format);
    }

    Ok(response)
}

/// Dispatch to the matched route handler
async fn dispatch(ctx: &RequestContext<'_>, state: &AppState) -> Response<Full<Bytes>> {
    match match_route(ctx.path, &state.config.site.images_dir) {
        Route::Image { filename } => static_files::serve_image(ctx, state, filename).await,
        Route::Root => static_files::serve_root(ctx, state).await,
    }
}

/// Check HTTP method and return appropriate response for non-GET/HEAD methods
fn check_http_method(method: &Method, enable_cors: bool) -> Option<Response<Full<Bytes>>> {
    match *method {
        Method::GET | Method::HEAD => None,
        Method::OPTIONS => Some(http::build_options_response(enable_cors)),
        _ => {
            logger::log_warning(&format!("Method not allowed: {method}"));
            Some(http::build_405_response())
        }
    }
}

/// Validate Content-Length header and return 413 if exceeded
fn check_body_size(
    req: &Request<hyper::body::Incoming>,
    max_body_size: u64,
) -> Option<Response<Full<Bytes>>> {
    let value = req.headers().get("content-length")?;
    let Ok(size_str) = value.to_str() else {
        logger::log_warning("Content-Length header is not valid ASCII");
        return None;
    };
    match size_str.parse::<u64>() {
        Ok(size) if size > max_body_size => {
            logger::log_warning(&format!(
                "Declared body too large: {size} bytes (max: {max_body_size})"
            ));
            Some(http::build_413_response())
        }
        Ok(_) => None,
        Err(_) => {
            logger::log_warning(&format!(
                "Invalid Content-Length value: '{size_str}', skipping size check"
            ));
            None
        }
    }
}

fn version_label(version: Version) -> String {
    match version {
        Version::HTTP_10 => "1.0",
        Version::HTTP_2 => "2",
        _ => "1.1",
    }
    .to_string()
}

fn header_string(req: &Request<hyper::body::Incoming>, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_route_matched_first() {
        assert_eq!(
            match_route("/images/a.png", "images"),
            Route::Image { filename: "a.png" }
        );
        assert_eq!(
            match_route("/images/sub/b.jpg", "images"),
            Route::Image {
                filename: "sub/b.jpg"
            }
        );
    }

    #[test]
    fn test_everything_else_falls_through_to_root() {
        assert_eq!(match_route("/", "images"), Route::Root);
        assert_eq!(match_route("/index.html", "images"), Route::Root);
        assert_eq!(match_route("/js/utils.js", "images"), Route::Root);
        // Bare directory path is not an image request
        assert_eq!(match_route("/images", "images"), Route::Root);
        // Prefix must match a whole segment
        assert_eq!(match_route("/imagesx/a.png", "images"), Route::Root);
    }

    #[test]
    fn test_configurable_image_prefix() {
        assert_eq!(
            match_route("/pics/a.jpg", "pics"),
            Route::Image { filename: "a.jpg" }
        );
        assert_eq!(match_route("/images/a.jpg", "pics"), Route::Root);
    }

    #[test]
    fn test_method_check() {
        assert!(check_http_method(&Method::GET, false).is_none());
        assert!(check_http_method(&Method::HEAD, false).is_none());

        let options = check_http_method(&Method::OPTIONS, false).expect("204");
        assert_eq!(options.status(), 204);

        let post = check_http_method(&Method::POST, false).expect("405");
        assert_eq!(post.status(), 405);
        let delete = check_http_method(&Method::DELETE, false).expect("405");
        assert_eq!(delete.status(), 405);
    }

    #[test]
    fn test_version_label() {
        assert_eq!(version_label(Version::HTTP_10), "1.0");
        assert_eq!(version_label(Version::HTTP_11), "1.1");
        assert_eq!(version_label(Version::HTTP_2), "2");
    }
}
