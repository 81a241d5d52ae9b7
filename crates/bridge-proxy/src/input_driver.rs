use std::future::Future;
use std::pin::Pin;

use anyhow::Context;
use serde_json::json;
use tile_bridge_core::player::{Control, InputDispatcher, Point, UiAction, Viewport};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tracing::debug;

struct DriverConn {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// Browser-automation driver reached over newline-delimited JSON. One request in flight at a
/// time; waits are served locally.
pub struct RemoteInputDriver {
    conn: Mutex<DriverConn>,
}

impl RemoteInputDriver {
    pub async fn connect(addr: &str) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("connect input driver {addr}"))?;
        stream.set_nodelay(true).ok();
        let (read, write) = stream.into_split();
        Ok(Self {
            conn: Mutex::new(DriverConn {
                reader: BufReader::new(read),
                writer: write,
            }),
        })
    }

    async fn request_json(&self, req: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        let line = format!("{req}\n");
        let mut conn = self.conn.lock().await;
        conn.writer
            .write_all(line.as_bytes())
            .await
            .context("driver write")?;
        conn.writer.flush().await.ok();

        let mut resp_line = String::new();
        let n = conn
            .reader
            .read_line(&mut resp_line)
            .await
            .context("driver read")?;
        if n == 0 {
            anyhow::bail!("driver connection closed");
        }
        let v: serde_json::Value =
            serde_json::from_str(resp_line.trim()).context("invalid driver json response")?;
        if v.get("ok").and_then(|ok| ok.as_bool()) != Some(true) {
            let error = v
                .get("error")
                .and_then(|e| e.as_str())
                .unwrap_or("unknown error");
            anyhow::bail!("driver rejected {}: {error}", req["op"]);
        }
        Ok(v)
    }

    fn point_of(v: &serde_json::Value) -> Option<Point> {
        Some(Point {
            x: v.get("x")?.as_f64()?,
            y: v.get("y")?.as_f64()?,
        })
    }
}

impl InputDispatcher for RemoteInputDriver {
    fn viewport<'a>(&'a self) -> Pin<Box<dyn Future<Output = anyhow::Result<Viewport>> + Send + 'a>> {
        Box::pin(async move {
            let v = self.request_json(json!({ "op": "viewport" })).await?;
            let width = v.get("width").and_then(|w| w.as_f64());
            let height = v.get("height").and_then(|h| h.as_f64());
            match (width, height) {
                (Some(width), Some(height)) if width > 0.0 && height > 0.0 => {
                    Ok(Viewport { width, height })
                }
                _ => anyhow::bail!("driver viewport reply without a usable size: {v}"),
            }
        })
    }

    fn locate<'a>(
        &'a self,
        control: Control,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<Point>>> + Send + 'a>> {
        Box::pin(async move {
            let v = self
                .request_json(json!({ "op": "locate", "target": control }))
                .await?;
            let found = v.get("found").and_then(|f| f.as_bool()).unwrap_or(true);
            Ok(if found { Self::point_of(&v) } else { None })
        })
    }

    fn dispatch<'a>(
        &'a self,
        action: UiAction,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let req = match action {
                UiAction::Wait(duration) => {
                    tokio::time::sleep(duration).await;
                    return Ok(());
                }
                UiAction::PointerDown(p) => json!({ "op": "pointer_down", "x": p.x, "y": p.y }),
                UiAction::PointerUp(p) => json!({ "op": "pointer_up", "x": p.x, "y": p.y }),
            };
            debug!("input.dispatch req={req}");
            self.request_json(req).await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::net::TcpListener;

    use super::*;

    /// Answers every request with a canned reply and returns the requests it saw.
    async fn fake_driver(replies: Vec<&'static str>) -> (String, tokio::task::JoinHandle<Vec<serde_json::Value>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let task = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut lines = BufReader::new(read).lines();
            let mut seen = Vec::new();
            for reply in replies {
                let Some(line) = lines.next_line().await.unwrap() else {
                    break;
                };
                seen.push(serde_json::from_str(&line).unwrap());
                write.write_all(format!("{reply}\n").as_bytes()).await.unwrap();
            }
            seen
        });
        (addr, task)
    }

    #[tokio::test]
    async fn clicks_and_queries_go_over_the_wire() {
        let (addr, task) = fake_driver(vec![
            r#"{"ok":true,"width":1920,"height":1080}"#,
            r#"{"ok":true,"found":false}"#,
            r#"{"ok":true}"#,
            r#"{"ok":true}"#,
        ])
        .await;
        let driver = RemoteInputDriver::connect(&addr).await.unwrap();
        assert_eq!(
            driver.viewport().await.unwrap(),
            Viewport {
                width: 1920.0,
                height: 1080.0
            }
        );
        assert_eq!(
            driver.locate(Control::ActionButton { slot: 1 }).await.unwrap(),
            None
        );
        let p = Point { x: 10.0, y: 20.0 };
        driver.dispatch(UiAction::PointerDown(p)).await.unwrap();
        driver.dispatch(UiAction::Wait(Duration::from_millis(1))).await.unwrap();
        driver.dispatch(UiAction::PointerUp(p)).await.unwrap();

        let seen = task.await.unwrap();
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[1]["target"]["control"], "action_button");
        assert_eq!(seen[2], json!({ "op": "pointer_down", "x": 10.0, "y": 20.0 }));
        assert_eq!(seen[3]["op"], "pointer_up");
    }

    #[tokio::test]
    async fn rejected_request_is_an_error() {
        let (addr, _task) = fake_driver(vec![r#"{"ok":false,"error":"page not ready"}"#]).await;
        let driver = RemoteInputDriver::connect(&addr).await.unwrap();
        let err = driver.viewport().await.unwrap_err();
        assert!(format!("{err:#}").contains("page not ready"));
    }
}
