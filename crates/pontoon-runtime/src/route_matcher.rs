//! Route matcher: dispatches HTTP requests on method and path patterns.
//!
//! Patterns are paths with `:name` parameter segments, or raw regular
//! expressions via the `*WithRegex` registrations. Matched parameters land
//! in the request's `params` map. First registered match wins.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use pontoon_script::{
    Callable, EventHandler, ScriptEnv, ScriptResult, Value, expect_callable, expect_str,
};
use regex::Regex;
use tracing::trace;

use crate::http_server::{HttpRequestCore, HttpServerRequest, ResponseParts};

struct Route {
    method: Option<String>,
    regex: Regex,
    param_names: Vec<String>,
    callable: Callable,
}

/// A request handler that routes by method and path.
pub struct RouteMatcher {
    routes: Mutex<Vec<Route>>,
    no_match: Mutex<Option<Callable>>,
    env: ScriptEnv,
}

impl RouteMatcher {
    pub const CLASS: &'static str = "Pontoon\\Http\\RouteMatcher";

    pub fn new(env: ScriptEnv) -> Arc<Self> {
        Arc::new(Self {
            routes: Mutex::new(Vec::new()),
            no_match: Mutex::new(None),
            env,
        })
    }

    pub fn value(self: &Arc<Self>) -> Value {
        Value::Resource(pontoon_script::Resource::from_arc(Self::CLASS, self.clone()))
    }

    pub fn get(&self, pattern: &Value, handler: &Value) -> ScriptResult<()> {
        self.add(Some("GET"), pattern, handler, false, "Pontoon\\Http\\RouteMatcher::get()")
    }

    pub fn put(&self, pattern: &Value, handler: &Value) -> ScriptResult<()> {
        self.add(Some("PUT"), pattern, handler, false, "Pontoon\\Http\\RouteMatcher::put()")
    }

    pub fn post(&self, pattern: &Value, handler: &Value) -> ScriptResult<()> {
        self.add(Some("POST"), pattern, handler, false, "Pontoon\\Http\\RouteMatcher::post()")
    }

    pub fn delete(&self, pattern: &Value, handler: &Value) -> ScriptResult<()> {
        self.add(
            Some("DELETE"),
            pattern,
            handler,
            false,
            "Pontoon\\Http\\RouteMatcher::delete()",
        )
    }

    pub fn options(&self, pattern: &Value, handler: &Value) -> ScriptResult<()> {
        self.add(
            Some("OPTIONS"),
            pattern,
            handler,
            false,
            "Pontoon\\Http\\RouteMatcher::options()",
        )
    }

    pub fn head(&self, pattern: &Value, handler: &Value) -> ScriptResult<()> {
        self.add(Some("HEAD"), pattern, handler, false, "Pontoon\\Http\\RouteMatcher::head()")
    }

    pub fn patch(&self, pattern: &Value, handler: &Value) -> ScriptResult<()> {
        self.add(
            Some("PATCH"),
            pattern,
            handler,
            false,
            "Pontoon\\Http\\RouteMatcher::patch()",
        )
    }

    pub fn all(&self, pattern: &Value, handler: &Value) -> ScriptResult<()> {
        self.add(None, pattern, handler, false, "Pontoon\\Http\\RouteMatcher::all()")
    }

    pub fn get_with_regex(&self, pattern: &Value, handler: &Value) -> ScriptResult<()> {
        self.add(
            Some("GET"),
            pattern,
            handler,
            true,
            "Pontoon\\Http\\RouteMatcher::getWithRegex()",
        )
    }

    pub fn post_with_regex(&self, pattern: &Value, handler: &Value) -> ScriptResult<()> {
        self.add(
            Some("POST"),
            pattern,
            handler,
            true,
            "Pontoon\\Http\\RouteMatcher::postWithRegex()",
        )
    }

    pub fn all_with_regex(&self, pattern: &Value, handler: &Value) -> ScriptResult<()> {
        self.add(
            None,
            pattern,
            handler,
            true,
            "Pontoon\\Http\\RouteMatcher::allWithRegex()",
        )
    }

    /// Handler for requests no route matches. Without one, unmatched
    /// requests get an empty 404.
    pub fn no_match(&self, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\Http\\RouteMatcher::noMatch()";
        let callable = expect_callable(&self.env, handler, "handler", SITE)?;
        *self.no_match.lock() = Some(callable);
        Ok(())
    }

    fn add(
        &self,
        method: Option<&str>,
        pattern: &Value,
        handler: &Value,
        raw_regex: bool,
        site: &str,
    ) -> ScriptResult<()> {
        let pattern = expect_str(&self.env, pattern, "pattern", site)?;
        let callable = expect_callable(&self.env, handler, "handler", site)?;
        let (regex, param_names) = if raw_regex {
            let regex = Regex::new(&pattern)
                .map_err(|err| self.env.error(format!("invalid pattern: {err}")))?;
            (regex, Vec::new())
        } else {
            compile_pattern(&pattern)
                .map_err(|err| self.env.error(format!("invalid pattern: {err}")))?
        };
        self.routes.lock().push(Route {
            method: method.map(str::to_string),
            regex,
            param_names,
            callable,
        });
        Ok(())
    }

    fn dispatch(&self, request: Arc<HttpRequestCore>) {
        let target = {
            let routes = self.routes.lock();
            routes.iter().find_map(|route| {
                if let Some(method) = &route.method {
                    if !method.eq_ignore_ascii_case(&request.method) {
                        return None;
                    }
                }
                let captures = route.regex.captures(&request.path)?;
                let mut params = HashMap::new();
                for (index, name) in route.param_names.iter().enumerate() {
                    if let Some(capture) = captures.get(index + 1) {
                        params.insert(name.clone(), capture.as_str().to_string());
                    }
                }
                Some((route.callable.clone(), params))
            })
        };
        match target {
            Some((callable, params)) => {
                trace!(method = %request.method, path = %request.path, "route matched");
                request.set_params(params);
                self.invoke(callable, request);
            }
            None => {
                let fallback = self.no_match.lock().clone();
                match fallback {
                    Some(callable) => self.invoke(callable, request),
                    None => request.respond(ResponseParts {
                        status: 404,
                        headers: Vec::new(),
                        body: Vec::new(),
                    }),
                }
            }
        }
    }

    fn invoke(&self, callable: Callable, request: Arc<HttpRequestCore>) {
        let value = HttpServerRequest::wrap(request, self.env.clone()).value();
        if let Err(fault) = callable.call(&self.env, &[value]) {
            self.env.report_fault(&fault);
        }
    }
}

impl EventHandler<Arc<HttpRequestCore>> for RouteMatcher {
    fn handle(&self, request: Arc<HttpRequestCore>) {
        self.dispatch(request);
    }
}

/// Compile a `:name` path pattern into an anchored regex plus the parameter
/// names in capture order.
fn compile_pattern(pattern: &str) -> Result<(Regex, Vec<String>), regex::Error> {
    let marker = Regex::new(r":([A-Za-z_][A-Za-z0-9_]*)").expect("static pattern");
    let mut names = Vec::new();
    let mut compiled = String::from("^");
    let mut last = 0;
    for capture in marker.captures_iter(pattern) {
        let whole = capture.get(0).expect("match");
        compiled.push_str(&regex::escape(&pattern[last..whole.start()]));
        compiled.push_str("([^/]+)");
        names.push(capture[1].to_string());
        last = whole.end();
    }
    compiled.push_str(&regex::escape(&pattern[last..]));
    compiled.push('$');
    Ok((Regex::new(&compiled)?, names))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    fn request(method: &str, path: &str) -> (Arc<HttpRequestCore>, oneshot::Receiver<ResponseParts>) {
        HttpRequestCore::for_tests(method, path)
    }

    fn capture_paths() -> (Callable, Arc<Mutex<Vec<String>>>) {
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callable = Callable::new("route", move |_env, args| {
            let resource = args[0].as_resource().unwrap();
            let request = resource.downcast::<HttpServerRequest>().unwrap();
            let mut line = match request.path() {
                Value::Str(path) => path,
                _ => unreachable!(),
            };
            if let Value::Array(params) = request.params() {
                for (key, value) in params.iter() {
                    if let Value::Str(v) = value {
                        line.push_str(&format!(" {}={}", key, v));
                    }
                }
            }
            sink.lock().push(line);
            Ok(())
        });
        (callable, seen)
    }

    #[test]
    fn parameter_segments_are_captured() {
        let matcher = RouteMatcher::new(ScriptEnv::new("t.php"));
        let (callable, seen) = capture_paths();
        matcher
            .get(
                &Value::Str("/users/:id/posts/:post".into()),
                &Value::Callable(callable),
            )
            .unwrap();
        let (core, _rx) = request("GET", "/users/42/posts/7");
        matcher.handle(core);
        assert_eq!(seen.lock().as_slice(), &["/users/42/posts/7 id=42 post=7"]);
    }

    #[test]
    fn method_mismatch_falls_through_to_404() {
        let matcher = RouteMatcher::new(ScriptEnv::new("t.php"));
        let (callable, seen) = capture_paths();
        matcher
            .get(&Value::Str("/only-get".into()), &Value::Callable(callable))
            .unwrap();
        let (core, mut rx) = request("POST", "/only-get");
        matcher.handle(core);
        assert!(seen.lock().is_empty());
        assert_eq!(rx.try_recv().unwrap().status, 404);
    }

    #[test]
    fn first_matching_route_wins() {
        let matcher = RouteMatcher::new(ScriptEnv::new("t.php"));
        let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second"] {
            let sink = order.clone();
            matcher
                .all(
                    &Value::Str("/x".into()),
                    &Value::Callable(Callable::new(tag, move |_env, _args| {
                        sink.lock().push(tag);
                        Ok(())
                    })),
                )
                .unwrap();
        }
        let (core, _rx) = request("GET", "/x");
        matcher.handle(core);
        assert_eq!(order.lock().as_slice(), &["first"]);
    }

    #[test]
    fn no_match_handler_replaces_the_404() {
        let matcher = RouteMatcher::new(ScriptEnv::new("t.php"));
        let (callable, seen) = capture_paths();
        matcher.no_match(&Value::Callable(callable)).unwrap();
        let (core, _rx) = request("GET", "/missing");
        matcher.handle(core);
        assert_eq!(seen.lock().as_slice(), &["/missing"]);
    }

    #[test]
    fn regex_routes_match_raw_patterns() {
        let matcher = RouteMatcher::new(ScriptEnv::new("t.php"));
        let (callable, seen) = capture_paths();
        matcher
            .get_with_regex(
                &Value::Str(r"^/files/.+\.txt$".into()),
                &Value::Callable(callable),
            )
            .unwrap();
        let (core, _rx) = request("GET", "/files/a.txt");
        matcher.handle(core);
        assert_eq!(seen.lock().as_slice(), &["/files/a.txt"]);

        assert!(
            matcher
                .get_with_regex(&Value::Str("(".into()), &Value::Callable(Callable::new(
                    "f",
                    |_, _| Ok(())
                )))
                .is_err()
        );
    }
}
