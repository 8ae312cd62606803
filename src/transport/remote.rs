//! Out-of-process learners over TCP.
//!
//! [`serve_learner`] hosts any [`LocalLearner`] behind a listener;
//! [`RemoteLearner`] implements the same trait by forwarding each call as a
//! request frame, so the coordinator treats local and remote clients alike.

use crate::core::{Error, Result};
use crate::federated::learner::{EvaluateRes, FitConfig, FitRes, LocalLearner};
use crate::federated::params::ParameterSet;
use crate::transport::codec::{read_frame, write_frame};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Call sent to a learner server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Request {
    GetParameters,
    Fit {
        parameters: ParameterSet,
        config: FitConfig,
    },
    Evaluate {
        parameters: ParameterSet,
    },
}

/// Reply from a learner server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Response {
    Parameters(ParameterSet),
    Fit(FitRes),
    Evaluate(EvaluateRes),
    /// The learner returned an error
    Error(String),
}

impl Request {
    fn kind(&self) -> &'static str {
        match self {
            Request::GetParameters => "get_parameters",
            Request::Fit { .. } => "fit",
            Request::Evaluate { .. } => "evaluate",
        }
    }
}

/// Learner reached over TCP.
///
/// Each call opens its own connection, so one instance may be used by
/// concurrent rounds without locking.
#[derive(Clone, Debug)]
pub struct RemoteLearner {
    addr: String,
}

impl RemoteLearner {
    /// Create a client for a learner server at `addr` (`host:port`).
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    /// Server address.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn call(&self, request: Request) -> Result<Response> {
        let mut stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| Error::Transport(format!("connect to {}: {}", self.addr, e)))?;
        stream.set_nodelay(true)?;

        write_frame(&mut stream, &request).await?;
        match read_frame(&mut stream).await? {
            Response::Error(reason) => Err(Error::Transport(format!(
                "{} failed on {}: {}",
                request.kind(),
                self.addr,
                reason
            ))),
            response => Ok(response),
        }
    }
}

fn unexpected(expected: &str, response: &Response) -> Error {
    Error::Transport(format!("expected {} response, got {}", expected, variant_name(response)))
}

fn variant_name(response: &Response) -> &'static str {
    match response {
        Response::Parameters(_) => "parameters",
        Response::Fit(_) => "fit",
        Response::Evaluate(_) => "evaluate",
        Response::Error(_) => "error",
    }
}

#[async_trait]
impl LocalLearner for RemoteLearner {
    async fn get_parameters(&self) -> Result<ParameterSet> {
        match self.call(Request::GetParameters).await? {
            Response::Parameters(params) => Ok(params),
            other => Err(unexpected("parameters", &other)),
        }
    }

    async fn fit(&self, parameters: ParameterSet, config: FitConfig) -> Result<FitRes> {
        match self.call(Request::Fit { parameters, config }).await? {
            Response::Fit(res) => Ok(res),
            other => Err(unexpected("fit", &other)),
        }
    }

    async fn evaluate(&self, parameters: ParameterSet) -> Result<EvaluateRes> {
        match self.call(Request::Evaluate { parameters }).await? {
            Response::Evaluate(res) => Ok(res),
            other => Err(unexpected("evaluate", &other)),
        }
    }
}

/// Serve `learner` on `listener` until accepting fails.
///
/// Each connection runs on its own task and may carry any number of
/// requests.
pub async fn serve_learner(listener: TcpListener, learner: Arc<dyn LocalLearner>) -> Result<()> {
    info!(addr = ?listener.local_addr().ok(), "learner server listening");
    loop {
        let (stream, peer) = listener.accept().await?;
        debug!(%peer, "connection accepted");
        let learner = Arc::clone(&learner);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, learner).await {
                warn!(%peer, error = %e, "connection closed with error");
            }
        });
    }
}

async fn handle_connection(mut stream: TcpStream, learner: Arc<dyn LocalLearner>) -> Result<()> {
    loop {
        let request: Request = match read_frame(&mut stream).await {
            Ok(request) => request,
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        };
        debug!(request = request.kind(), "request received");

        let response = match dispatch(learner.as_ref(), request).await {
            Ok(response) => response,
            Err(e) => Response::Error(e.to_string()),
        };
        write_frame(&mut stream, &response).await?;
    }
}

async fn dispatch(learner: &dyn LocalLearner, request: Request) -> Result<Response> {
    Ok(match request {
        Request::GetParameters => Response::Parameters(learner.get_parameters().await?),
        Request::Fit { parameters, config } => Response::Fit(learner.fit(parameters, config).await?),
        Request::Evaluate { parameters } => Response::Evaluate(learner.evaluate(parameters).await?),
    })
}
