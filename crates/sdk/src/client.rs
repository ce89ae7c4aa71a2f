//! Matchmaking client: reserves a seat over HTTP, then opens the room's
//! WebSocket endpoint.

use std::sync::Arc;

use berth_client_api_messages::{RoomAvailable, SeatReservation};
use berth_schema::TypeDescriptor;

use crate::auth::Auth;
use crate::http::{HttpClient, HttpError};
use crate::matchmake::{self, MatchmakeError};
use crate::room::Room;
use crate::settings::{EndpointError, Settings};

/// Entry point: matchmaking over HTTP plus room connection.
pub struct Client {
    settings: Settings,
    http: HttpClient,
    auth: Auth,
}

impl Client {
    /// `endpoint` is `"http(s)://hostname[:port]"`.
    pub fn new(endpoint: &str) -> Result<Client, EndpointError> {
        Client::with_settings(Settings::from_endpoint(endpoint)?)
    }

    pub fn with_settings(settings: Settings) -> Result<Client, EndpointError> {
        let http = HttpClient::new(settings.http_endpoint()?);
        let auth = Auth::new(http.clone(), &settings.hostname);
        Ok(Client {
            settings,
            http,
            auth,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    /// Joins an existing room of this type or creates one.
    pub async fn join_or_create(
        &self,
        room_name: &str,
        options: serde_json::Value,
        root: Arc<TypeDescriptor>,
    ) -> Result<Room, MatchmakeError> {
        self.matchmake("joinOrCreate", room_name, options, root).await
    }

    pub async fn create(
        &self,
        room_name: &str,
        options: serde_json::Value,
        root: Arc<TypeDescriptor>,
    ) -> Result<Room, MatchmakeError> {
        self.matchmake("create", room_name, options, root).await
    }

    pub async fn join(
        &self,
        room_name: &str,
        options: serde_json::Value,
        root: Arc<TypeDescriptor>,
    ) -> Result<Room, MatchmakeError> {
        self.matchmake("join", room_name, options, root).await
    }

    pub async fn join_by_id(
        &self,
        room_id: &str,
        options: serde_json::Value,
        root: Arc<TypeDescriptor>,
    ) -> Result<Room, MatchmakeError> {
        self.matchmake("joinById", room_id, options, root).await
    }

    /// Rejoins a previous session using the `"{roomId}:{token}"` token the
    /// room handed out on join.
    pub async fn reconnect(
        &self,
        reconnection_token: &str,
        root: Arc<TypeDescriptor>,
    ) -> Result<Room, MatchmakeError> {
        let Some((room_id, token)) = reconnection_token.split_once(':') else {
            return Err(MatchmakeError::InvalidReconnectionToken);
        };
        self.matchmake(
            "reconnect",
            room_id,
            serde_json::json!({ "reconnectionToken": token }),
            root,
        )
        .await
    }

    /// Lists publicly available rooms of one type.
    pub async fn get_available_rooms(
        &self,
        room_name: &str,
    ) -> Result<Vec<RoomAvailable>, HttpError> {
        let reply = self.http.get_json(&format!("matchmake/{room_name}")).await?;
        Ok(serde_json::from_value(reply)?)
    }

    /// Opens the WebSocket endpoint a seat reservation points at and wraps
    /// it in a [`Room`].
    pub async fn consume_seat_reservation(
        &self,
        seat: SeatReservation,
        root: Arc<TypeDescriptor>,
    ) -> Result<Room, MatchmakeError> {
        matchmake::consume_seat_reservation(&self.settings, seat, root).await
    }

    async fn matchmake(
        &self,
        method: &str,
        room_name: &str,
        options: serde_json::Value,
        root: Arc<TypeDescriptor>,
    ) -> Result<Room, MatchmakeError> {
        let seat = matchmake::reserve_seat(&self.http, method, room_name, &options).await?;
        matchmake::consume_seat_reservation(&self.settings, seat, root).await
    }
}
