//! Stdio transport integration tests.
//!
//! Spawn the built binary in stdio mode and speak newline-delimited
//! JSON-RPC to it, the way a real MCP client would.

#![allow(deprecated)] // Allow deprecated cargo_bin for now

use assert_cmd::cargo::CommandCargoExt;
use assert_cmd::Command as AssertCommand;
use predicates::prelude::*;
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

/// Client speaking JSON-RPC to the server over its standard streams.
struct StdioClient {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    request_id: i64,
}

impl StdioClient {
    fn spawn() -> Result<Self, Box<dyn std::error::Error>> {
        let mut child = Command::cargo_bin("mcp-relay")?
            .arg("--transport")
            .arg("stdio")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let stdin = child.stdin.take().expect("Failed to get stdin");
        let stdout = BufReader::new(child.stdout.take().expect("Failed to get stdout"));

        Ok(Self {
            child,
            stdin,
            stdout,
            request_id: 0,
        })
    }

    fn send_raw(&mut self, line: &str) -> Result<(), Box<dyn std::error::Error>> {
        writeln!(self.stdin, "{line}")?;
        self.stdin.flush()?;
        Ok(())
    }

    /// Read lines until a response (a frame with an `id`) arrives,
    /// skipping server-initiated notification frames.
    fn read_response(&mut self) -> Result<Value, Box<dyn std::error::Error>> {
        loop {
            let mut line = String::new();
            if self.stdout.read_line(&mut line)? == 0 {
                return Err("server closed stdout".into());
            }
            let value: Value = serde_json::from_str(line.trim())?;
            if value.get("id").is_some() {
                return Ok(value);
            }
        }
    }

    fn request(
        &mut self,
        method: &str,
        params: Value,
    ) -> Result<Value, Box<dyn std::error::Error>> {
        self.request_id += 1;
        let request = json!({
            "jsonrpc": "2.0",
            "id": self.request_id,
            "method": method,
            "params": params
        });
        self.send_raw(&serde_json::to_string(&request)?)?;
        self.read_response()
    }

    fn notify(&mut self, method: &str, params: Value) -> Result<(), Box<dyn std::error::Error>> {
        let notification = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params
        });
        self.send_raw(&serde_json::to_string(&notification)?)
    }

    fn initialize(&mut self) -> Result<Value, Box<dyn std::error::Error>> {
        self.request(
            "initialize",
            json!({
                "protocolVersion": "2025-06-18",
                "clientInfo": { "name": "stdio-test", "version": "1.0.0" }
            }),
        )
    }
}

impl Drop for StdioClient {
    fn drop(&mut self) {
        let _ = self.child.kill();
    }
}

#[test]
fn test_initialize_and_ping() {
    let mut client = StdioClient::spawn().expect("spawn server");

    let response = client.initialize().expect("initialize");
    let result = &response["result"];
    let session_id = result["sessionId"].as_str().expect("sessionId");
    assert_eq!(session_id.len(), 32);
    assert!(session_id.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(result["protocolVersion"], "2025-06-18");
    assert_eq!(result["capabilities"]["tools"]["listChanged"], true);
    assert_eq!(result["capabilities"]["resources"]["subscribe"], true);
    assert_eq!(result["serverInfo"]["name"], "mcp-relay");

    client
        .notify("notifications/initialized", json!({}))
        .expect("initialized notification");

    let response = client.request("ping", json!({})).expect("ping");
    assert_eq!(response["result"], json!({}));
    assert!(response.get("error").is_none());
}

#[test]
fn test_echo_tool_call() {
    let mut client = StdioClient::spawn().expect("spawn server");
    client.initialize().expect("initialize");

    let response = client
        .request(
            "tools/call",
            json!({ "name": "echo", "arguments": { "message": "hi" } }),
        )
        .expect("tools/call");

    let result = &response["result"];
    assert_eq!(result["content"], json!([{"type": "text", "text": "Echo: hi"}]));
    assert_eq!(result["isError"], false);
}

#[test]
fn test_tools_list_contains_builtins() {
    let mut client = StdioClient::spawn().expect("spawn server");
    client.initialize().expect("initialize");

    let response = client.request("tools/list", json!({})).expect("tools/list");
    let names: Vec<&str> = response["result"]["tools"]
        .as_array()
        .expect("tools array")
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["echo", "time", "sleep"]);
}

#[test]
fn test_unknown_tool_and_unknown_method() {
    let mut client = StdioClient::spawn().expect("spawn server");
    client.initialize().expect("initialize");

    let response = client
        .request("tools/call", json!({ "name": "missing" }))
        .expect("tools/call");
    assert_eq!(response["error"]["code"], -32603);
    assert_eq!(response["error"]["message"], "Tool not found: missing");

    let response = client
        .request("no/such/method", json!({}))
        .expect("request");
    assert_eq!(response["error"]["code"], -32601);
    assert_eq!(
        response["error"]["message"],
        "Method [no/such/method] not found"
    );
}

#[test]
fn test_parse_error_reply() {
    let mut client = StdioClient::spawn().expect("spawn server");
    client.send_raw("{this is not json").expect("send");

    let response = client.read_response().expect("response");
    assert_eq!(response["error"]["code"], -32700);
    assert!(response["id"].is_null());
}

#[test]
fn test_blank_lines_ignored() {
    let mut client = StdioClient::spawn().expect("spawn server");
    client.send_raw("").expect("send blank");
    client.send_raw("   ").expect("send spaces");

    let response = client.request("ping", json!({})).expect("ping");
    assert_eq!(response["result"], json!({}));
}

#[test]
fn test_resources_roundtrip() {
    let mut client = StdioClient::spawn().expect("spawn server");
    client.initialize().expect("initialize");

    let response = client
        .request("resources/list", json!({}))
        .expect("resources/list");
    let resources = response["result"]["resources"].as_array().expect("array");
    assert!(resources.iter().any(|r| r["uri"] == "mcp://relay/about"));

    let response = client
        .request("resources/read", json!({ "uri": "mcp://relay/about" }))
        .expect("resources/read");
    let contents = &response["result"]["contents"][0];
    assert_eq!(contents["mimeType"], "text/plain");
    assert!(contents["text"].as_str().unwrap().contains("mcp-relay"));

    // Blob resources come back base64-encoded.
    let response = client
        .request("resources/read", json!({ "uri": "mcp://relay/pixel.png" }))
        .expect("resources/read");
    let blob = response["result"]["contents"][0]["blob"].as_str().unwrap();
    assert!(!blob.is_empty());
    assert!(blob.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '='));

    let response = client
        .request("resources/templates/list", json!({}))
        .expect("templates");
    assert_eq!(
        response["result"]["resourceTemplates"][0]["uriTemplate"],
        "mcp://relay/echo/{message}"
    );
}

#[test]
fn test_prompt_roundtrip() {
    let mut client = StdioClient::spawn().expect("spawn server");
    client.initialize().expect("initialize");

    let response = client
        .request("prompts/list", json!({}))
        .expect("prompts/list");
    let prompts = response["result"]["prompts"].as_array().expect("array");
    assert_eq!(prompts[0]["name"], "summarize");
    assert_eq!(prompts[0]["arguments"][0]["name"], "text");

    let response = client
        .request(
            "prompts/get",
            json!({ "name": "summarize", "arguments": { "text": "lorem ipsum" } }),
        )
        .expect("prompts/get");
    let message = &response["result"]["messages"][0];
    assert_eq!(message["role"], "user");
    assert!(message["content"][0]["text"]
        .as_str()
        .unwrap()
        .contains("lorem ipsum"));
}

#[test]
fn test_logging_set_level() {
    let mut client = StdioClient::spawn().expect("spawn server");
    client.initialize().expect("initialize");

    let response = client
        .request("logging/setLevel", json!({ "level": "debug" }))
        .expect("setLevel");
    assert_eq!(response["result"], json!({}));

    let response = client
        .request("logging/setLevel", json!({ "level": "shouty" }))
        .expect("setLevel");
    assert_eq!(response["error"]["message"], "Invalid log level: shouty");
}

#[test]
fn test_completion_over_stdio() {
    let mut client = StdioClient::spawn().expect("spawn server");
    client.initialize().expect("initialize");

    let response = client
        .request(
            "completion/complete",
            json!({
                "ref": { "type": "ref/prompt", "name": "summarize" },
                "argument": { "name": "name", "value": "sum" }
            }),
        )
        .expect("complete");
    assert_eq!(response["result"]["completion"]["values"], json!(["summarize"]));
}

#[test]
fn test_subscription_gates_update_notifications() {
    let mut client = StdioClient::spawn().expect("spawn server");
    client.initialize().expect("initialize");

    let response = client
        .request("resources/subscribe", json!({ "uri": "mcp://relay/about" }))
        .expect("subscribe");
    assert_eq!(response["result"], json!({}));

    // Subscribing to an unregistered URI is refused with the MCP code.
    let response = client
        .request("resources/subscribe", json!({ "uri": "mem://ghost" }))
        .expect("subscribe");
    assert_eq!(response["error"]["code"], -32002);

    // Unsubscribing an unknown URI succeeds silently.
    let response = client
        .request("resources/unsubscribe", json!({ "uri": "mem://ghost" }))
        .expect("unsubscribe");
    assert_eq!(response["result"], json!({}));
}

#[test]
fn test_version_flag() {
    AssertCommand::cargo_bin("mcp-relay")
        .expect("binary")
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("mcp-relay"));
}
