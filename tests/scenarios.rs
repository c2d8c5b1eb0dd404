//! End-to-end dispatch scenarios driven entirely through the public
//! `Engine` API, exercising the concrete request/response pairs a reader
//! can check by hand: one route in, one response out.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http::{Method, Request};
use kestrel::{Context, Engine, Handler};

fn request(method: Method, path: &str) -> Request<Bytes> {
    Request::builder().method(method).uri(path).body(Bytes::new()).unwrap()
}

struct Collector(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for Collector {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn drive(engine: &Engine, method: Method, path: &str) -> String {
    let buf = Arc::new(Mutex::new(Vec::new()));
    engine.serve_http(request(method, path), Box::new(Collector(buf.clone())));
    String::from_utf8(buf.lock().unwrap().clone()).unwrap()
}

#[test]
fn scenario_1_named_param_binds_and_reports_full_path() {
    let engine = Engine::new();
    engine
        .get(
            "/user/:name",
            vec![Handler::new(|ctx: &mut Context| {
                let name = ctx.params().get("name").unwrap().to_string();
                let _ = ctx.writer().write_str(&name);
            })],
        )
        .unwrap();

    let out = drive(&engine, Method::GET, "/user/alice");
    assert!(out.starts_with("HTTP/1.1 200"));
    assert!(out.ends_with("alice"));
}

#[test]
fn scenario_2_catch_all_binds_remaining_path() {
    let engine = Engine::new();
    engine
        .get(
            "/files/*path",
            vec![Handler::new(|ctx: &mut Context| {
                let path = ctx.params().get("path").unwrap().to_string();
                let _ = ctx.writer().write_str(&path);
            })],
        )
        .unwrap();

    let out = drive(&engine, Method::GET, "/files/a/b/c.txt");
    assert!(out.ends_with("/a/b/c.txt"));
}

#[test]
fn scenario_3_method_not_allowed_lists_registered_methods() {
    let engine = Engine::new();
    engine.get("/x", vec![Handler::new(|_ctx: &mut Context| {})]).unwrap();
    engine.post("/x", vec![Handler::new(|_ctx: &mut Context| {})]).unwrap();

    let out = drive(&engine, Method::PUT, "/x");
    assert!(out.contains("405"));
    assert!(out.contains("Allow: GET, POST"));
}

#[test]
fn scenario_4_trailing_slash_redirects_to_registered_form() {
    let engine = Engine::new();
    engine.get("/a/b", vec![Handler::new(|_ctx: &mut Context| {})]).unwrap();

    let out = drive(&engine, Method::GET, "/a/b/");
    assert!(out.contains("301"));
    assert!(out.contains("Location: /a/b\r\n"));
}

#[test]
fn scenario_5_case_insensitive_redirect_to_canonical_form() {
    let engine = Engine::new();
    engine.get("/Search", vec![Handler::new(|_ctx: &mut Context| {})]).unwrap();

    let out = drive(&engine, Method::GET, "/search");
    assert!(out.contains("301"));
    assert!(out.contains("Location: /Search\r\n"));
}

#[test]
fn scenario_6_static_sibling_beats_wildcard_at_same_position() {
    let engine = Engine::new();
    engine
        .get(
            "/user/:id",
            vec![Handler::new(|ctx: &mut Context| {
                let id = ctx.params().get("id").unwrap().to_string();
                let _ = ctx.writer().write_str(&format!("param:{id}"));
            })],
        )
        .unwrap();
    engine
        .get("/user/new", vec![Handler::new(|ctx: &mut Context| {
            let _ = ctx.writer().write_str("static");
        })])
        .unwrap();

    assert!(drive(&engine, Method::GET, "/user/new").ends_with("static"));
    assert!(drive(&engine, Method::GET, "/user/42").ends_with("param:42"));
}

#[test]
fn scenario_7_escaped_colon_matches_literal_segment_only() {
    let engine = Engine::new();
    engine
        .get(
            "/literal/\\:colon",
            vec![Handler::new(|ctx: &mut Context| {
                assert!(ctx.params().is_empty());
                let _ = ctx.writer().write_str("ok");
            })],
        )
        .unwrap();

    let out = drive(&engine, Method::GET, "/literal/:colon");
    assert!(out.contains("200"));
    assert!(out.ends_with("ok"));

    let miss = drive(&engine, Method::GET, "/literal/other");
    assert!(miss.contains("404"));
}

#[test]
fn p6_tsr_symmetry_uses_307_for_non_get() {
    let engine = Engine::new();
    engine.post("/a/b", vec![Handler::new(|_ctx: &mut Context| {})]).unwrap();

    let out = drive(&engine, Method::POST, "/a/b/");
    assert!(out.contains("307"));
    assert!(out.contains("Location: /a/b\r\n"));
}

#[test]
fn unregistered_path_falls_through_to_404() {
    let engine = Engine::new();
    let out = drive(&engine, Method::GET, "/nope");
    assert!(out.contains("404"));
    assert!(out.ends_with("404 page not found"));
}

#[test]
fn router_group_prefixes_and_inherits_middleware() {
    let engine = Engine::new();
    let calls = Arc::new(Mutex::new(Vec::new()));

    let c1 = calls.clone();
    let group = engine.group("/api");
    group
        .get(
            "/ping",
            vec![Handler::new(move |ctx: &mut Context| {
                c1.lock().unwrap().push("handler");
                let _ = ctx.writer().write_str("pong");
            })],
        )
        .unwrap();

    let out = drive(&engine, Method::GET, "/api/ping");
    assert!(out.ends_with("pong"));
    assert_eq!(*calls.lock().unwrap(), vec!["handler"]);
}
