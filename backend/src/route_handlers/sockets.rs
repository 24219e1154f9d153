use std::io::Write;

use axum::{
  extract::{
    ws::{self, CloseFrame, Message, Utf8Bytes, WebSocket},
    Query, State, WebSocketUpgrade,
  },
  response::IntoResponse,
  Extension,
};
use flate2::{write::DeflateEncoder, Compression};
use futures::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
  midwares::app_state::{AppState, RequestContext},
  session::{ClientMessage, ServerMessage, Session},
};

const OUTBOX_CAPACITY: usize = 1024;
const INBOX_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum CodecError {
  #[error("json: {0}")]
  Json(#[from] serde_json::Error),
  #[error("msgpack encode: {0}")]
  MsgpackEncode(#[from] rmp_serde::encode::Error),
  #[error("msgpack decode: {0}")]
  MsgpackDecode(#[from] rmp_serde::decode::Error),
  #[error("compression: {0}")]
  Compress(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
  #[default]
  Json,
  Msgpack,
}

/// Query string of the websocket upgrade.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct WsParams {
  #[serde(default)]
  pub encoding: Encoding,
  #[serde(default)]
  pub compress: bool,
}

/// Frames server messages and reads client ones in the negotiated format.
#[derive(Debug, Clone, Copy, Default)]
pub struct WireCodec {
  pub encoding: Encoding,
  pub compress: bool,
}

impl From<WsParams> for WireCodec {
  fn from(p: WsParams) -> Self {
    Self { encoding: p.encoding, compress: p.compress }
  }
}

impl WireCodec {
  pub fn encode(&self, msg: &ServerMessage) -> Result<Message, CodecError> {
    let frame = match (self.encoding, self.compress) {
      (Encoding::Json, false) => Message::text(serde_json::to_string(msg)?),
      (Encoding::Json, true) => Message::binary(compress_data(&serde_json::to_vec(msg)?)?),
      // named fields so the internally tagged messages survive the round trip
      (Encoding::Msgpack, false) => Message::binary(rmp_serde::to_vec_named(msg)?),
      (Encoding::Msgpack, true) => Message::binary(compress_data(&rmp_serde::to_vec_named(msg)?)?),
    };
    Ok(frame)
  }

  /// `Ok(None)` for control frames.
  pub fn decode(&self, msg: Message) -> Result<Option<ClientMessage>, CodecError> {
    let decoded = match msg {
      Message::Text(t) => serde_json::from_str(t.as_str())?,
      Message::Binary(b) => match self.encoding {
        Encoding::Json => serde_json::from_slice(&b)?,
        Encoding::Msgpack => rmp_serde::from_slice(&b)?,
      },
      _ => return Ok(None),
    };
    Ok(Some(decoded))
  }
}

pub async fn ws_handler(
  ws: WebSocketUpgrade,
  State(state): State<AppState>,
  Query(params): Query<WsParams>,
  Extension(ctx): Extension<RequestContext>,
) -> impl IntoResponse {
  let RequestContext { remote_ip, timestamp, signature, .. } = ctx;
  info!(%remote_ip, encoding = ?params.encoding, compress = params.compress, "websocket upgrade");

  // signed clients offer "<ts>, <sig>" as subprotocols and expect one back
  let ws = if signature.is_empty() { ws } else { ws.protocols([signature, timestamp]) };
  ws.on_upgrade(move |socket| handle_socket(socket, state, params.into(), remote_ip))
}

async fn handle_socket(socket: WebSocket, state: AppState, codec: WireCodec, who: String) {
  let (mut sender, mut receiver) = socket.split();
  let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(OUTBOX_CAPACITY);
  let (in_tx, in_rx) = mpsc::channel::<ClientMessage>(INBOX_CAPACITY);

  let reply_tx = out_tx.clone();
  let session = match Session::start(state.store.clone(), &state.config, out_tx).await {
    Ok(session) => session,
    Err(e) => {
      warn!(%who, error = %e, "session failed to start");
      graceful_ws_closure(sender, ws::close_code::ERROR, "session failed to start").await;
      return;
    }
  };
  let session_id = session.id().to_string();
  info!(%who, session = %session_id, "websocket session started");
  let session_task = tokio::spawn(session.run(in_rx));

  // outbound frames get their own task so a full session inbox never
  // stops the outbox from draining
  let mut writer = tokio::spawn(async move {
    while let Some(out) = out_rx.recv().await {
      if !send_frame(&mut sender, &codec, &out).await {
        return;
      }
    }
    graceful_ws_closure(sender, ws::close_code::NORMAL, "session ended").await;
  });
  let mut writer_done = false;

  loop {
    tokio::select! {
      _ = &mut writer, if !writer_done => {
        writer_done = true;
        break;
      }
      msg = receiver.next() => {
        match msg {
          Some(Ok(Message::Close(_))) | None => {
            debug!(session = %session_id, "client closed the socket");
            break;
          }
          Some(Err(e)) => {
            warn!(session = %session_id, error = %e, "websocket receive failed");
            break;
          }
          Some(Ok(frame)) => match codec.decode(frame) {
            Ok(Some(cmd)) => {
              if in_tx.send(cmd).await.is_err() {
                break;
              }
            }
            Ok(None) => {}
            Err(e) => {
              debug!(session = %session_id, error = %e, "undecodable client message");
              let reply = ServerMessage::error("session", format!("invalid message: {}", e));
              if reply_tx.send(reply).await.is_err() {
                break;
              }
            }
          },
        }
      }
    }
  }

  // closing the inbox ends the session, which drops the workers
  drop(in_tx);
  drop(reply_tx);
  if let Err(e) = session_task.await {
    warn!(session = %session_id, error = %e, "session task failed");
  }
  if !writer_done {
    if let Err(e) = writer.await {
      warn!(session = %session_id, error = %e, "websocket writer failed");
    }
  }
  info!(%who, session = %session_id, "websocket context destroyed");
}

async fn send_frame(sender: &mut SplitSink<WebSocket, Message>, codec: &WireCodec, msg: &ServerMessage) -> bool {
  match codec.encode(msg) {
    Ok(frame) => sender.send(frame).await.is_ok(),
    Err(e) => {
      // skip the message, keep the socket
      warn!(error = %e, "failed to encode server message");
      true
    }
  }
}

// helper function to compress data
pub fn compress_data(data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
  let mut encoder = DeflateEncoder::new(Vec::new(), Compression::fast());
  encoder.write_all(data)?;
  encoder.finish()
}

// helper to close the Websocket gracefully
async fn graceful_ws_closure(mut sender: SplitSink<WebSocket, Message>, code: u16, reason: &'static str) {
  if let Err(e) = sender.send(Message::Close(Some(CloseFrame { code, reason: Utf8Bytes::from_static(reason) }))).await {
    debug!(error = %e, "error sending close frame");
  }
  // flush to ensure all messages are sent
  if let Err(e) = sender.flush().await {
    debug!(error = %e, "error flushing sender");
  }
}
