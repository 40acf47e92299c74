//! The wire side of the event stream.
//!
//! `EventStreamClient` only sees `Frame`s; how they are produced is behind the
//! `Transport` trait so the reconnect logic can be driven by a scripted
//! transport in tests.

use eventsource_client::{self as es, Client};
use futures_util::stream::{BoxStream, StreamExt};
use log::*;

/// One unit of input from the push connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// The server accepted the connection.
    Open,
    /// A named event with its raw `data:` payload.
    Event {
        id: Option<String>,
        event: String,
        data: String,
    },
    /// Keep-alive comment line.
    Comment,
}

/// Frames of a single connection attempt. An `Err` item or the end of the stream
/// both mean the connection is gone.
pub type FrameStream = BoxStream<'static, Result<Frame, String>>;

/// Everything a transport needs to open one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

pub trait Transport: Send + Sync {
    /// Starts one connection attempt. The returned stream is lazy: nothing
    /// touches the network until it is first polled.
    fn open(&self, request: ConnectRequest) -> FrameStream;
}

/// `Transport` backed by `eventsource-client`, with the library's own retry
/// disabled so that reconnect policy stays with the caller.
#[derive(Debug, Clone, Default)]
pub struct EventSourceTransport;

impl EventSourceTransport {
    pub fn new() -> Self {
        Self
    }

    fn build_client(request: &ConnectRequest) -> Result<impl Client, es::Error> {
        let mut builder = es::ClientBuilder::for_url(&request.url)?
            .header("Accept", "text/event-stream")?
            .header("Cache-Control", "no-cache")?;

        for (name, value) in &request.headers {
            builder = builder.header(name, value)?;
        }

        Ok(builder
            .reconnect(es::ReconnectOptions::reconnect(false).build())
            .build())
    }
}

impl Transport for EventSourceTransport {
    fn open(&self, request: ConnectRequest) -> FrameStream {
        async_stream::stream! {
            let client = match Self::build_client(&request) {
                Ok(client) => client,
                Err(e) => {
                    yield Err(format!("Failed to create connection: {e:?}"));
                    return;
                }
            };

            let mut events = client.stream();
            while let Some(item) = events.next().await {
                match item {
                    Ok(es::SSE::Event(event)) => {
                        yield Ok(Frame::Event {
                            id: event.id,
                            event: event.event_type,
                            data: event.data,
                        });
                    }
                    Ok(es::SSE::Comment(comment)) => {
                        trace!("SSE comment: {comment}");
                        yield Ok(Frame::Comment);
                    }
                    #[allow(unreachable_patterns)]
                    Ok(_) => {
                        yield Ok(Frame::Open);
                    }
                    Err(e) => {
                        yield Err(format!("Connection error occurred: {e:?}"));
                        return;
                    }
                }
            }
        }
        .boxed()
    }
}
