//! Seat reservation: requesting a seat from the matchmaker and consuming it
//! by opening the room's WebSocket endpoint.

use std::sync::Arc;

use http::uri::Uri;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use thiserror::Error;

use berth_client_api_messages::SeatReservation;
use berth_schema::TypeDescriptor;

use crate::http::{HttpClient, HttpError};
use crate::room::Room;
use crate::serializer::SchemaSerializer;
use crate::settings::{EndpointError, Settings};
use crate::transport::TransportError;
use crate::websocket::WebSocketTransport;

#[derive(Debug, Error)]
pub enum MatchmakeError {
    /// The server rejected the request with a structured `{code, message}`.
    #[error("{message} (code {code})")]
    Server { code: u32, message: String },
    #[error("unexpected matchmaking reply shape: {0}")]
    Shape(#[from] serde_json::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Endpoint(#[from] EndpointError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("invalid reconnection token (expected `roomId:token`)")]
    InvalidReconnectionToken,
}

impl From<HttpError> for MatchmakeError {
    fn from(e: HttpError) -> MatchmakeError {
        match e {
            HttpError::Server { code, message } => MatchmakeError::Server { code, message },
            HttpError::Shape(e) => MatchmakeError::Shape(e),
            HttpError::Transport(e) => MatchmakeError::Http(e),
        }
    }
}

/// `POST /matchmake/{method}/{name}` with a JSON options body; the reply is
/// the granted seat.
pub(crate) async fn reserve_seat(
    http: &HttpClient,
    method: &str,
    room_name: &str,
    options: &serde_json::Value,
) -> Result<SeatReservation, MatchmakeError> {
    let reply = http
        .post_json(&format!("matchmake/{method}/{room_name}"), options)
        .await?;
    Ok(serde_json::from_value(reply)?)
}

/// Opens the WebSocket endpoint a seat reservation points at and wraps the
/// connection in a [`Room`].
pub(crate) async fn consume_seat_reservation(
    settings: &Settings,
    seat: SeatReservation,
    root: Arc<TypeDescriptor>,
) -> Result<Room, MatchmakeError> {
    let endpoint = room_endpoint(settings, &seat)?;
    log::debug!("connecting to room endpoint {endpoint}");
    let (transport, events) = WebSocketTransport::connect(endpoint).await?;
    Ok(Room::with_transport(
        &seat.room.name,
        &seat.room.room_id,
        &seat.session_id,
        SchemaSerializer::new(root),
        Box::new(transport),
        events,
    ))
}

/// `{ws|wss}://…/{processId}/{roomId}?sessionId=…[&reconnectionToken=…]`,
/// rooted at the seat's public address when it names one.
pub(crate) fn room_endpoint(
    settings: &Settings,
    seat: &SeatReservation,
) -> Result<Uri, EndpointError> {
    let base = match &seat.room.public_address {
        Some(addr) if !addr.is_empty() => {
            let scheme = if settings.secure { "wss" } else { "ws" };
            format!("{scheme}://{addr}").parse::<Uri>()?
        }
        _ => settings.ws_endpoint()?,
    };

    let mut path_and_query = format!(
        "/{}/{}?sessionId={}",
        seat.room.process_id,
        seat.room.room_id,
        query_encode(&seat.session_id),
    );
    if let Some(token) = &seat.reconnection_token {
        path_and_query.push_str("&reconnectionToken=");
        path_and_query.push_str(&query_encode(token));
    }

    let mut parts = base.into_parts();
    parts.path_and_query = Some(path_and_query.parse()?);
    Ok(Uri::from_parts(parts)?)
}

fn query_encode(value: &str) -> String {
    utf8_percent_encode(value, NON_ALPHANUMERIC).to_string()
}
