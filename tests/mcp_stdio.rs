use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

struct Server {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    next_id: i64,
}

impl Server {
    async fn start(data_dir: &Path) -> Result<Self> {
        let mut child = Command::new(env!("CARGO_BIN_EXE_cgc"))
            .arg("start")
            .current_dir(data_dir)
            .env("CGC_DATA_DIR", data_dir.join("state"))
            .env("RUST_LOG", "warn")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context("spawn cgc start")?;

        let stderr = child.stderr.take().context("stderr")?;
        let mut stderr = BufReader::new(stderr).lines();
        let ready = tokio::time::timeout(Duration::from_secs(20), async {
            while let Some(line) = stderr.next_line().await? {
                if line.contains("MCP Server is running") {
                    return Ok::<bool, std::io::Error>(true);
                }
            }
            Ok(false)
        })
        .await
        .context("timeout waiting for readiness line")??;
        if !ready {
            bail!("server exited before becoming ready");
        }
        // Keep draining stderr so the child never blocks on a full pipe.
        tokio::spawn(async move { while let Ok(Some(_)) = stderr.next_line().await {} });

        Ok(Self {
            stdin: child.stdin.take().context("stdin")?,
            stdout: BufReader::new(child.stdout.take().context("stdout")?),
            child,
            next_id: 1,
        })
    }

    async fn request(&mut self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id;
        self.next_id += 1;
        let mut line = serde_json::to_vec(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        }))?;
        line.push(b'\n');
        self.stdin.write_all(&line).await?;
        self.stdin.flush().await?;

        loop {
            let mut response = String::new();
            let n = tokio::time::timeout(Duration::from_secs(20), self.stdout.read_line(&mut response))
                .await
                .context("timeout reading response")??;
            if n == 0 {
                bail!("EOF while waiting for response {id}");
            }
            let value: Value = match serde_json::from_str(&response) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if value["id"] == id {
                return Ok(value);
            }
        }
    }

    /// Decoded tool payload, or `error.data` for protocol-level failures.
    async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<Value> {
        let response = self
            .request("tools/call", json!({ "name": name, "arguments": arguments }))
            .await?;
        if let Some(text) = response["result"]["content"][0]["text"].as_str() {
            return Ok(serde_json::from_str(text)?);
        }
        Ok(response["error"]["data"].clone())
    }
}

fn sample_project() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("sample_project")
        .canonicalize()
        .expect("sample project exists")
}

fn names(rows: &Value, key: &str) -> Vec<String> {
    rows.as_array()
        .map(|rows| {
            rows.iter()
                .filter_map(|r| r[key].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn index_and_query_sample_project_over_stdio() -> Result<()> {
    let data_dir = tempfile::tempdir()?;
    let project = sample_project();
    let project_str = project.to_string_lossy().to_string();
    let mut server = Server::start(data_dir.path()).await?;

    let init = server.request("initialize", json!({})).await?;
    assert!(init.get("result").is_some(), "initialize failed: {init}");

    server
        .call_tool("delete_repository", json!({ "repo_path": project_str }))
        .await?;
    let added = server
        .call_tool("add_code_to_graph", json!({ "path": project_str }))
        .await?;
    assert_eq!(added["success"], true, "indexing failed: {added}");
    let job_id = added["job_id"].as_str().context("job_id")?.to_string();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(60);
    loop {
        let status = server
            .call_tool("check_job_status", json!({ "job_id": job_id }))
            .await?;
        match status["job"]["status"].as_str() {
            Some("completed") => break,
            Some("failed") | Some("cancelled") => bail!("indexing job ended badly: {status}"),
            _ if tokio::time::Instant::now() > deadline => bail!("indexing timed out"),
            _ => tokio::time::sleep(Duration::from_millis(100)).await,
        }
    }

    let repos = server.call_tool("list_indexed_repositories", json!({})).await?;
    assert!(names(&repos["repositories"], "path").contains(&project_str));

    let found = server.call_tool("find_code", json!({ "query": "foo" })).await?;
    assert!(found["results"]["ranked_results"]
        .as_array()
        .context("ranked_results")?
        .iter()
        .any(|r| r["name"] == "foo" && r["file_path"].as_str().unwrap_or("").contains("module_a.py")));

    let callers = server
        .call_tool(
            "analyze_code_relationships",
            json!({ "query_type": "find_callers", "target": "helper" }),
        )
        .await?;
    let callers = names(&callers["results"]["results"], "caller_function");
    assert!(callers.contains(&"foo".to_string()));
    assert!(callers.contains(&"call_helper_twice".to_string()));

    let hierarchy = server
        .call_tool(
            "analyze_code_relationships",
            json!({
                "query_type": "class_hierarchy",
                "target": "C",
                "context": project.join("advanced_classes.py").to_string_lossy(),
            }),
        )
        .await?;
    let parents = names(&hierarchy["results"]["results"]["parent_classes"], "parent_class");
    assert!(parents.contains(&"A".to_string()) && parents.contains(&"B".to_string()));

    let complexity = server
        .call_tool(
            "calculate_cyclomatic_complexity",
            json!({ "function_name": "try_except_finally" }),
        )
        .await?;
    assert_eq!(complexity["results"][0]["complexity"], 4);

    let rows = server
        .call_tool(
            "execute_cypher_query",
            json!({ "cypher_query": "MATCH (n:Function) RETURN n.name AS functionName LIMIT 5" }),
        )
        .await?;
    assert_eq!(rows["success"], true);
    assert!(rows["results"][0].get("functionName").is_some());

    let rejected = server
        .call_tool(
            "execute_cypher_query",
            json!({ "cypher_query": "CREATE (n:TestNode) RETURN n" }),
        )
        .await?;
    assert!(rejected.get("success").is_none());
    assert!(rejected["error"]
        .as_str()
        .unwrap_or("")
        .to_lowercase()
        .contains("read-only"));

    let unknown = server.call_tool("no_such_tool", json!({})).await?;
    assert!(unknown["error"].as_str().unwrap_or("").contains("no_such_tool"));

    let pong = server.request("ping", json!({})).await?;
    assert_eq!(pong["result"], json!({}));

    server.child.kill().await?;
    Ok(())
}
