use std::sync::Arc;

use eyre::Result;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

use taskstore::{QueueStore, TaskStatus};

use super::request::{read_request, HttpRequest};

#[derive(Debug, Deserialize)]
struct CreateTaskBody {
    task_group_id: String,
    prompt: String,
}

#[derive(Debug, Serialize)]
struct CreateTaskResponse {
    task_id: String,
}

#[derive(Debug, Serialize)]
struct TaskResponse {
    task_id: String,
    status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    clarification: Option<taskstore::Clarification>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    namespace: String,
    namespace_auto_derived: bool,
    table_name: &'static str,
    state_dir: String,
}

#[derive(Debug, Serialize)]
struct NamespaceResponse {
    namespace: String,
    auto_derived: bool,
    state_dir: String,
    port: u16,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

pub async fn handle_connection(
    mut stream: TcpStream,
    queue: Arc<QueueStore>,
    namespace: String,
    state_dir: String,
    port: u16,
) -> Result<()> {
    let request = {
        let mut reader = BufReader::new(&mut stream);
        read_request(&mut reader).await?
    };
    debug!(method = %request.method, path = %request.path, "api::handle_connection: dispatching");

    let (status_line, body) = dispatch(&request, &queue, &namespace, &state_dir, port).await;
    write_response(&mut stream, status_line, &body).await
}

async fn dispatch(request: &HttpRequest, queue: &Arc<QueueStore>, namespace: &str, state_dir: &str, port: u16) -> (&'static str, String) {
    let (path, query) = request.path.split_once('?').unwrap_or((request.path.as_str(), ""));

    match (request.method.as_str(), path) {
        ("POST", "/api/tasks") => create_task(request, queue, namespace).await,
        ("GET", "/api/tasks") => list_tasks(queue, namespace, query).await,
        ("GET", p) if p.starts_with("/api/tasks/") => get_task(queue, namespace, &p["/api/tasks/".len()..]).await,
        ("GET", "/api/health") => health(namespace, state_dir),
        ("GET", "/api/namespace") => namespace_info(namespace, state_dir, port),
        _ => ("404 Not Found", serde_json::to_string(&ErrorBody { error: "unknown route".to_string() }).unwrap()),
    }
}

fn query_param<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == key).then_some(v)
    })
}

async fn create_task(request: &HttpRequest, queue: &Arc<QueueStore>, namespace: &str) -> (&'static str, String) {
    let parsed: Result<CreateTaskBody, _> = serde_json::from_str(&request.body);
    let body = match parsed {
        Ok(body) => body,
        Err(e) => return ("400 Bad Request", serde_json::to_string(&ErrorBody { error: e.to_string() }).unwrap()),
    };

    match queue.enqueue(namespace, &uuid::Uuid::new_v4().to_string(), &body.task_group_id, &body.prompt, None, None).await {
        Ok(task) => (
            "200 OK",
            serde_json::to_string(&CreateTaskResponse { task_id: task.task_id }).unwrap(),
        ),
        Err(e) => ("500 Internal Server Error", serde_json::to_string(&ErrorBody { error: e.to_string() }).unwrap()),
    }
}

async fn get_task(queue: &Arc<QueueStore>, namespace: &str, task_id: &str) -> (&'static str, String) {
    match queue.get_item(namespace, task_id).await {
        Ok(Some(task)) => (
            "200 OK",
            serde_json::to_string(&TaskResponse {
                task_id: task.task_id,
                status: task.status,
                output: task.output,
                error_message: task.error_message,
                clarification: task.clarification,
            })
            .unwrap(),
        ),
        Ok(None) => ("404 Not Found", serde_json::to_string(&ErrorBody { error: "unknown task".to_string() }).unwrap()),
        Err(e) => ("500 Internal Server Error", serde_json::to_string(&ErrorBody { error: e.to_string() }).unwrap()),
    }
}

async fn list_tasks(queue: &Arc<QueueStore>, namespace: &str, query: &str) -> (&'static str, String) {
    let result = if let Some(task_group_id) = query_param(query, "task_group") {
        queue.get_by_task_group(namespace, task_group_id).await
    } else if let Some(status) = query_param(query, "status").and_then(parse_status) {
        queue.get_by_status(namespace, status).await
    } else {
        queue.get_by_status(namespace, TaskStatus::Queued).await
    };

    match result {
        Ok(tasks) => {
            let ids: Vec<String> = tasks.into_iter().map(|t| t.task_id).collect();
            ("200 OK", serde_json::to_string(&ids).unwrap())
        }
        Err(e) => ("500 Internal Server Error", serde_json::to_string(&ErrorBody { error: e.to_string() }).unwrap()),
    }
}

fn parse_status(raw: &str) -> Option<TaskStatus> {
    match raw {
        "QUEUED" => Some(TaskStatus::Queued),
        "RUNNING" => Some(TaskStatus::Running),
        "COMPLETE" => Some(TaskStatus::Complete),
        "ERROR" => Some(TaskStatus::Error),
        "AWAITING_RESPONSE" => Some(TaskStatus::AwaitingResponse),
        "CANCELLED" => Some(TaskStatus::Cancelled),
        _ => None,
    }
}

fn health(namespace: &str, state_dir: &str) -> (&'static str, String) {
    let response = HealthResponse {
        status: "ok",
        timestamp: taskstore::now_ms(),
        namespace: namespace.to_string(),
        namespace_auto_derived: false,
        table_name: "tasks",
        state_dir: state_dir.to_string(),
    };
    ("200 OK", serde_json::to_string(&response).unwrap())
}

fn namespace_info(namespace: &str, state_dir: &str, port: u16) -> (&'static str, String) {
    let response = NamespaceResponse {
        namespace: namespace.to_string(),
        auto_derived: false,
        state_dir: state_dir.to_string(),
        port,
    };
    ("200 OK", serde_json::to_string(&response).unwrap())
}

async fn write_response(stream: &mut TcpStream, status_line: &str, body: &str) -> Result<()> {
    let response = format!(
        "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}
