//! Redis probe speaking RESP directly: optional `AUTH`, optional `SELECT`,
//! then `PING`.

use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::time::Instant;

use depwatch_core::{
    BoxFuture, DependencyType, Endpoint, Probe, ProbeError, ProbeOutcome, ProbeSettings,
    StatusCategory,
};

use crate::tcp::connect;

/// Longest reply line accepted before the reply is treated as garbage.
const MAX_LINE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Reply {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Option<Vec<u8>>),
}

#[derive(Clone, Default)]
pub struct RedisProbe {
    password: Option<String>,
    db: Option<u32>,
}

impl RedisProbe {
    pub fn new(settings: &ProbeSettings) -> Self {
        Self {
            password: settings.redis_password.clone().filter(|p| !p.is_empty()),
            db: settings.redis_db,
        }
    }

    async fn session<S>(&self, stream: S) -> ProbeOutcome
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut stream = BufReader::new(stream);

        if let Some(password) = &self.password {
            let reply = command(&mut stream, &["AUTH", password]).await?;
            expect_ok(reply)?;
        }
        if let Some(db) = self.db {
            let reply = command(&mut stream, &["SELECT", &db.to_string()]).await?;
            expect_ok(reply)?;
        }

        match command(&mut stream, &["PING"]).await? {
            Reply::Simple(s) if s == "PONG" => Ok(()),
            Reply::Error(message) => Err(reply_error(message)),
            other => Err(ProbeError::Unhealthy(format!("unexpected PING reply: {other:?}"))),
        }
    }
}

impl Probe for RedisProbe {
    fn check<'a>(&'a self, endpoint: &'a Endpoint, deadline: Instant) -> BoxFuture<'a, ProbeOutcome> {
        Box::pin(async move {
            let stream = connect(endpoint, deadline).await?;
            tokio::time::timeout_at(deadline, self.session(stream))
                .await
                .map_err(|_| ProbeError::Timeout)?
        })
    }

    fn dependency_type(&self) -> DependencyType {
        DependencyType::Redis
    }
}

impl std::fmt::Debug for RedisProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisProbe")
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("db", &self.db)
            .finish()
    }
}

fn expect_ok(reply: Reply) -> ProbeOutcome {
    match reply {
        Reply::Simple(s) if s == "OK" => Ok(()),
        Reply::Error(message) => Err(reply_error(message)),
        other => Err(ProbeError::Unhealthy(format!("unexpected reply: {other:?}"))),
    }
}

fn reply_error(message: String) -> ProbeError {
    if message.contains("NOAUTH") || message.contains("WRONGPASS") {
        ProbeError::classified(StatusCategory::AuthError, "auth_error", format!("redis: {message}"))
    } else {
        ProbeError::Unhealthy(format!("redis: {message}"))
    }
}

// ── RESP ──────────────────────────────────────────────────────────

/// Encode a command as a RESP array of bulk strings.
fn encode(parts: &[&str]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", parts.len()).into_bytes();
    for part in parts {
        out.extend_from_slice(format!("${}\r\n", part.len()).as_bytes());
        out.extend_from_slice(part.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out
}

async fn command<S>(stream: &mut BufReader<S>, parts: &[&str]) -> Result<Reply, ProbeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.get_mut().write_all(&encode(parts)).await?;
    stream.get_mut().flush().await?;
    read_reply(stream).await
}

async fn read_reply<R>(reader: &mut R) -> Result<Reply, ProbeError>
where
    R: AsyncBufRead + Unpin,
{
    let line = read_line(reader).await?;
    let mut chars = line.chars();
    let kind = chars.next();
    let body = chars.as_str();
    let reply = match kind {
        Some('+') => Reply::Simple(body.to_string()),
        Some('-') => Reply::Error(body.to_string()),
        Some(':') => Reply::Integer(body.parse().map_err(|_| protocol_error(&line))?),
        Some('$') => {
            let len: i64 = body.parse().map_err(|_| protocol_error(&line))?;
            if len < 0 {
                Reply::Bulk(None)
            } else {
                let len = usize::try_from(len).map_err(|_| protocol_error(&line))?;
                if len > MAX_LINE {
                    return Err(protocol_error(&line));
                }
                let mut data = vec![0u8; len + 2];
                reader.read_exact(&mut data).await?;
                data.truncate(len);
                Reply::Bulk(Some(data))
            }
        }
        _ => return Err(protocol_error(&line)),
    };
    Ok(reply)
}

/// Read one CRLF-terminated line, without the terminator.
async fn read_line<R>(reader: &mut R) -> Result<String, ProbeError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let n = (&mut *reader).take(MAX_LINE as u64).read_until(b'\n', &mut buf).await?;
    if n == 0 {
        return Err(ProbeError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed before reply",
        )));
    }
    if !buf.ends_with(b"\r\n") {
        return Err(protocol_error(&String::from_utf8_lossy(&buf)));
    }
    buf.truncate(buf.len() - 2);
    String::from_utf8(buf).map_err(|e| protocol_error(&e.to_string()))
}

fn protocol_error(line: &str) -> ProbeError {
    ProbeError::Other(anyhow::anyhow!("malformed redis reply: {line:?}"))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use depwatch_core::classify;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    use super::*;

    /// Fake server answering each command in order with a canned reply.
    async fn fake_redis(replies: &'static [&'static str]) -> (u16, oneshot::Receiver<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut socket = BufReader::new(socket);
            let mut commands = Vec::new();
            for reply in replies {
                let Ok(header) = read_line(&mut socket).await else { break };
                let count: usize = header[1..].parse().unwrap();
                let mut parts = Vec::new();
                for _ in 0..count {
                    match read_bulk_arg(&mut socket).await {
                        Some(part) => parts.push(part),
                        None => break,
                    }
                }
                commands.push(parts.join(" "));
                socket.get_mut().write_all(reply.as_bytes()).await.unwrap();
            }
            let _ = tx.send(commands);
        });
        (port, rx)
    }

    async fn read_bulk_arg(socket: &mut BufReader<tokio::net::TcpStream>) -> Option<String> {
        match read_reply(socket).await.ok()? {
            Reply::Bulk(Some(data)) => String::from_utf8(data).ok(),
            _ => None,
        }
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    #[test]
    fn encodes_bulk_array() {
        assert_eq!(encode(&["PING"]), b"*1\r\n$4\r\nPING\r\n");
        assert_eq!(encode(&["SELECT", "2"]), b"*2\r\n$6\r\nSELECT\r\n$1\r\n2\r\n");
    }

    #[tokio::test]
    async fn parses_reply_kinds() {
        let mut input: &[u8] = b"+OK\r\n-ERR nope\r\n:42\r\n$3\r\nabc\r\n$-1\r\n";
        assert_eq!(read_reply(&mut input).await.unwrap(), Reply::Simple("OK".to_string()));
        assert_eq!(read_reply(&mut input).await.unwrap(), Reply::Error("ERR nope".to_string()));
        assert_eq!(read_reply(&mut input).await.unwrap(), Reply::Integer(42));
        assert_eq!(read_reply(&mut input).await.unwrap(), Reply::Bulk(Some(b"abc".to_vec())));
        assert_eq!(read_reply(&mut input).await.unwrap(), Reply::Bulk(None));
        assert!(read_reply(&mut input).await.is_err());
    }

    #[tokio::test]
    async fn ping_pong_is_healthy() {
        let (port, commands) = fake_redis(&["+PONG\r\n"]).await;
        let outcome = RedisProbe::default()
            .check(&Endpoint::new("127.0.0.1", port), deadline())
            .await;
        assert!(outcome.is_ok());
        assert_eq!(commands.await.unwrap(), vec!["PING"]);
    }

    #[tokio::test]
    async fn auth_and_select_precede_ping() {
        let (port, commands) = fake_redis(&["+OK\r\n", "+OK\r\n", "+PONG\r\n"]).await;
        let settings = ProbeSettings {
            redis_password: Some("hunter2".to_string()),
            redis_db: Some(3),
            ..Default::default()
        };
        let outcome = RedisProbe::new(&settings)
            .check(&Endpoint::new("127.0.0.1", port), deadline())
            .await;
        assert!(outcome.is_ok());
        assert_eq!(
            commands.await.unwrap(),
            vec!["AUTH hunter2", "SELECT 3", "PING"]
        );
    }

    #[tokio::test]
    async fn noauth_is_auth_error() {
        let (port, _commands) = fake_redis(&["-NOAUTH Authentication required.\r\n"]).await;
        let outcome = RedisProbe::default()
            .check(&Endpoint::new("127.0.0.1", port), deadline())
            .await;
        let result = classify(&outcome);
        assert_eq!(result.category, StatusCategory::AuthError);
        assert_eq!(result.detail, "auth_error");
    }

    #[tokio::test]
    async fn wrong_password_is_auth_error() {
        let (port, _commands) =
            fake_redis(&["-WRONGPASS invalid username-password pair\r\n"]).await;
        let settings = ProbeSettings {
            redis_password: Some("bad".to_string()),
            ..Default::default()
        };
        let outcome = RedisProbe::new(&settings)
            .check(&Endpoint::new("127.0.0.1", port), deadline())
            .await;
        assert_eq!(classify(&outcome).category, StatusCategory::AuthError);
    }

    #[tokio::test]
    async fn other_error_reply_is_unhealthy() {
        let (port, _commands) = fake_redis(&["-LOADING Redis is loading the dataset\r\n"]).await;
        let outcome = RedisProbe::default()
            .check(&Endpoint::new("127.0.0.1", port), deadline())
            .await;
        let result = classify(&outcome);
        assert_eq!(result.category, StatusCategory::Unhealthy);
        assert_eq!(result.detail, "unhealthy");
    }

    #[test]
    fn debug_hides_password() {
        let settings = ProbeSettings {
            redis_password: Some("hunter2".to_string()),
            ..Default::default()
        };
        let debug = format!("{:?}", RedisProbe::new(&settings));
        assert!(!debug.contains("hunter2"));
    }
}
