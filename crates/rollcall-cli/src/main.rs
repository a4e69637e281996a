use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall face enrollment and login CLI")]
struct Cli {
    /// Base URL of the rollcalld server
    #[arg(long, env = "ROLLCALL_SERVER", default_value = "http://localhost:3000")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a student with one to three face captures
    Register {
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        surname: String,
        #[arg(long, default_value = "")]
        middle_initial: String,
        /// Generated by the server when omitted
        #[arg(long)]
        student_id: Option<String>,
        #[arg(long)]
        subject_code: Option<String>,
        #[arg(long)]
        section: Option<String>,
        /// Face images (PNG or JPEG)
        #[arg(required = true, num_args = 1..=3)]
        images: Vec<PathBuf>,
    },
    /// Log in by recognizing the face in an image
    Login { image: PathBuf },
    /// Report the head orientation in an image
    Check { image: PathBuf },
    /// Show server status
    Status,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    student_id: Option<String>,
    first_name: String,
    middle_initial: String,
    surname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    subject_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    section: Option<String>,
    images: serde_json::Map<String, Value>,
}

/// Read an image file as a base64 payload.
fn encode_file(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(BASE64.encode(bytes))
}

/// `{ "pic1": ..., "pic2": ..., "pic3": ... }` for the given files, in order.
fn image_slots(paths: &[PathBuf]) -> Result<serde_json::Map<String, Value>> {
    if paths.is_empty() || paths.len() > 3 {
        bail!("between one and three images are required, got {}", paths.len());
    }
    paths
        .iter()
        .enumerate()
        .map(|(i, path)| -> Result<(String, Value)> {
            Ok((format!("pic{}", i + 1), Value::String(encode_file(path)?)))
        })
        .collect()
}

struct Client {
    http: reqwest::Client,
    server: String,
}

impl Client {
    fn new(server: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            server: server.trim_end_matches('/').to_string(),
        }
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<Value> {
        let url = format!("{}{path}", self.server);
        tracing::debug!(%url, "POST");
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("failed to reach {url}"))?;
        read_response(response).await
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let url = format!("{}{path}", self.server);
        tracing::debug!(%url, "GET");
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("failed to reach {url}"))?;
        read_response(response).await
    }
}

async fn read_response(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body: Value = response.json().await.context("server returned a non-JSON body")?;
    if !status.is_success() {
        bail!("{} ({status})", message_of(&body));
    }
    Ok(body)
}

fn message_of(body: &Value) -> String {
    body.get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = Client::new(&cli.server);

    match cli.command {
        Commands::Register {
            first_name,
            surname,
            middle_initial,
            student_id,
            subject_code,
            section,
            images,
        } => {
            let body = RegisterBody {
                student_id,
                first_name,
                middle_initial,
                surname,
                subject_code,
                section,
                images: image_slots(&images)?,
            };
            let reply = client.post("/register", &body).await?;
            println!("{}", message_of(&reply));
            if let Some(id) = reply.get("studentId").and_then(Value::as_str) {
                println!("  student id: {id}");
            }
        }
        Commands::Login { image } => {
            let body = serde_json::json!({ "image": encode_file(&image)? });
            let reply = client.post("/login-recognize", &body).await?;
            println!("{}", message_of(&reply));
            if let Some(distance) = reply.get("distance").and_then(Value::as_f64) {
                println!("  distance: {distance:.4}");
            }
        }
        Commands::Check { image } => {
            let body = serde_json::json!({ "image": encode_file(&image)? });
            let reply = client.post("/check-face", &body).await?;
            let orientation = reply
                .get("orientation")
                .and_then(Value::as_str)
                .unwrap_or("none");
            println!("Orientation: {orientation}");
        }
        Commands::Status => {
            let reply = client.get("/status").await?;
            println!("rollcalld {}", reply["version"].as_str().unwrap_or("?"));
            println!("  subjects:              {}", reply["subjects"]);
            println!("  descriptor dim:        {}", reply["descriptorDim"]);
            println!("  duplicate threshold:   {}", reply["duplicateThreshold"]);
            println!("  recognition threshold: {}", reply["recognitionThreshold"]);
        }
    }

    Ok(())
}
