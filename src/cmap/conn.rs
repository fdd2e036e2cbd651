//! A single connection to a server: a TCP stream plus the handshake state every command sent over
//! it needs (the negotiated wire version range, this pool generation's invalidation stamp).

use tokio::net::TcpStream;

use super::wire::Message;
use super::Command;
use crate::error::{Error, Result};
use crate::hello::{hello_command_document, HelloCommandResponse};
use crate::options::{ClientOptions, ServerAddress};

/// The subset of a `hello` reply a connection caches once its handshake completes, so command
/// assembly knows what the server it's talking to actually supports.
#[derive(Debug, Clone, Default)]
pub struct StreamDescription {
    pub max_wire_version: Option<i32>,
    pub min_wire_version: Option<i32>,
    pub max_bson_object_size: i64,
    pub max_message_size_bytes: i32,
    pub max_write_batch_size: Option<i64>,
}

impl StreamDescription {
    pub fn from_hello_reply(reply: &HelloCommandResponse) -> Self {
        Self {
            max_wire_version: reply.max_wire_version,
            min_wire_version: reply.min_wire_version,
            max_bson_object_size: reply.max_bson_object_size,
            max_message_size_bytes: reply.max_message_size_bytes,
            max_write_batch_size: reply.max_write_batch_size,
        }
    }
}

/// An unpooled, single-use connection to a specific server.
#[derive(Debug)]
pub struct Connection {
    pub id: u32,
    pub address: ServerAddress,
    pub generation: u32,
    pub stream_description: Option<StreamDescription>,
    stream: TcpStream,
}

impl Connection {
    /// Opens a TCP connection and performs the initial `hello` handshake. This is the only
    /// `hello` this crate ever sends on its own initiative — ongoing SDAM monitoring (periodic
    /// `hello` polling to detect topology changes) is the caller's responsibility.
    pub async fn establish(
        id: u32,
        address: ServerAddress,
        generation: u32,
        options: &ClientOptions,
    ) -> Result<Self> {
        let stream = TcpStream::connect((address.host.as_str(), address.port()))
            .await
            .map_err(Error::from)?;

        let mut conn = Self {
            id,
            address,
            generation,
            stream_description: None,
            stream,
        };

        let (body, _name) = hello_command_document(
            options.server_api.as_ref(),
            Some(options.load_balanced),
            None,
            None,
        );
        let mut command = Command::new("hello", "admin", body);
        if let Some(ref api) = options.server_api {
            command.set_server_api(api);
        }

        let reply: HelloCommandResponse = conn.execute(command).await?.body()?;
        conn.stream_description = Some(StreamDescription::from_hello_reply(&reply));
        Ok(conn)
    }

    /// Sends `command` and reads back its reply, without interpreting whether it succeeded —
    /// that's the dispatcher's job, since only it knows how to classify and retry a failure.
    pub async fn execute(&mut self, command: Command) -> Result<RawCommandResponse> {
        let message = Message::with_command(command.into_document());
        message.write_to(&mut self.stream).await?;
        let reply = Message::read_from(&mut self.stream).await?;
        Ok(RawCommandResponse {
            source: self.address.clone(),
            document: reply.single_document_response()?,
        })
    }
}

/// A command reply, still unvalidated: the caller decides whether `ok: 0` means an error.
#[derive(Debug, Clone)]
pub struct RawCommandResponse {
    pub source: ServerAddress,
    document: crate::bson::Document,
}

impl RawCommandResponse {
    #[cfg(test)]
    pub fn with_document_and_address(source: ServerAddress, document: crate::bson::Document) -> Self {
        Self { source, document }
    }

    pub fn document(&self) -> &crate::bson::Document {
        &self.document
    }

    pub fn body<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        crate::bson::from_document(self.document.clone()).map_err(Error::from)
    }
}
