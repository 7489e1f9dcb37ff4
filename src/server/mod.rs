//! TCP wire-protocol server.
//!
//! One `Session` per connection, a handler dispatching queries into it.
//! The wire format is the engine's own 1-byte type + 4-byte big-endian
//! length framing, so the handler reads and writes that framing directly
//! over a `tokio::net::TcpStream`.

pub mod protocol;
pub mod session;

use std::sync::Arc;

use log::{error, info};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::engine::Engine;
use crate::error::Result;
use crate::server::protocol::MessageType;
use crate::server::session::Session;

/// Accept connections until the listener is dropped or `shutdown_rx` fires,
/// spawning one task per connection. Each connection's blocking SQL work is
/// dispatched via `spawn_blocking` since `Engine` is synchronous.
pub async fn serve(engine: Arc<Engine>, listener: TcpListener) -> Result<()> {
    loop {
        let (stream, addr) = listener.accept().await?;
        info!("accepted connection from {}", addr);
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(engine, stream).await {
                error!("connection {} ended with error: {}", addr, e);
            }
        });
    }
}

async fn handle_connection(engine: Arc<Engine>, mut stream: TcpStream) -> Result<()> {
    let mut session = Session::new();

    loop {
        let (msg_type, payload) = match read_frame(&mut stream).await {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(()),
            Err(e) => return Err(e),
        };

        match msg_type {
            MessageType::Disconnect => return Ok(()),
            MessageType::Ping => write_frame(&mut stream, MessageType::Pong, &[]).await?,
            MessageType::Connect => write_frame(&mut stream, MessageType::Pong, &[]).await?,
            MessageType::Begin => {
                let isolation = protocol::decode_isolation(&payload);
                session.begin(&engine, isolation);
                write_frame(&mut stream, MessageType::Result, &protocol::encode_ack("BEGIN")).await?;
            }
            MessageType::Commit => {
                let outcome = session.commit(&engine);
                respond_to_outcome(&mut stream, outcome.map(|_| protocol::ack_result("COMMIT"))).await?;
            }
            MessageType::Rollback => {
                let outcome = session.rollback(&engine);
                respond_to_outcome(&mut stream, outcome.map(|_| protocol::ack_result("ROLLBACK"))).await?;
            }
            MessageType::Query => {
                let sql = String::from_utf8_lossy(&payload).into_owned();
                let txn = session.current_txn();
                let engine = Arc::clone(&engine);
                let result = run_blocking(move || match &txn {
                    Some(txn) => engine.execute_in(txn, &sql),
                    None => engine.execute_autocommit(&sql),
                })
                .await?;
                respond_to_outcome(&mut stream, result.map(|r| protocol::encode_query_result(&r))).await?;
            }
            MessageType::Prepare => {
                let sql = String::from_utf8_lossy(&payload).into_owned();
                match session.prepare(&sql) {
                    Ok(handle) => write_frame(&mut stream, MessageType::Result, &protocol::encode_handle(handle)).await?,
                    Err(e) => write_frame(&mut stream, MessageType::Error, &protocol::encode_error(&e)).await?,
                }
            }
            MessageType::Execute => {
                let handle = protocol::decode_handle(&payload);
                let query = match session.prepared_query(handle) {
                    Ok(q) => q,
                    Err(e) => {
                        write_frame(&mut stream, MessageType::Error, &protocol::encode_error(&e)).await?;
                        continue;
                    }
                };
                let txn = session.current_txn();
                let engine = Arc::clone(&engine);
                let result = run_blocking(move || match &txn {
                    Some(txn) => engine.execute_parsed_in(txn, query),
                    None => engine.execute_parsed_autocommit(query),
                })
                .await?;
                respond_to_outcome(&mut stream, result.map(|r| protocol::encode_query_result(&r))).await?;
            }
            MessageType::Result | MessageType::Error | MessageType::Pong => {
                // Server never receives these from a client; ignore rather
                // than tearing down the connection over a protocol slip.
            }
        }
    }
}

/// Run synchronous engine work on a blocking thread, since `Engine` holds
/// OS-level mutexes and does real disk I/O that would otherwise stall the
/// executor.
async fn run_blocking<F>(f: F) -> Result<Result<crate::sql::executor::QueryResult>>
where
    F: FnOnce() -> Result<crate::sql::executor::QueryResult> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| crate::error::Error::internal(format!("executor task panicked: {}", e)))
}

async fn respond_to_outcome(
    stream: &mut TcpStream,
    outcome: Result<Vec<u8>>,
) -> Result<()> {
    match outcome {
        Ok(payload) => write_frame(stream, MessageType::Result, &payload).await,
        Err(e) => write_frame(stream, MessageType::Error, &protocol::encode_error(&e)).await,
    }
}

async fn read_frame(stream: &mut TcpStream) -> Result<Option<(MessageType, Vec<u8>)>> {
    let mut header = [0u8; 5];
    match stream.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let msg_type = MessageType::from_byte(header[0])?;
    let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
    let mut payload = vec![0u8; len];
    if len > 0 {
        stream.read_exact(&mut payload).await?;
    }
    Ok(Some((msg_type, payload)))
}

async fn write_frame(stream: &mut TcpStream, msg_type: MessageType, payload: &[u8]) -> Result<()> {
    let mut header = [0u8; 5];
    header[0] = msg_type.to_byte();
    header[1..5].copy_from_slice(&(payload.len() as u32).to_be_bytes());
    stream.write_all(&header).await?;
    if !payload.is_empty() {
        stream.write_all(payload).await?;
    }
    Ok(())
}
