//! HTTP API for the ledger
//!
//! Every mutation requires `If-Match` with the current tag of the entity it
//! depends on (`*` accepts any existing state). Reads honor `If-Match` as a
//! freshness check and answer `304` when the client is current. Every entity
//! response carries an `ETag`.
//!
//! ## Users
//! - `GET /users`, `POST /users`, `GET /users/community`
//! - `GET /users/{id}`, `PATCH /users/{id}`, `GET /users/{id}/transactions`
//!
//! ## Transactions
//! - `POST /transactions` - guarded on the sender
//! - `GET /transactions/{id}`
//! - `POST /splits` - guarded on the single party
//! - `GET /multitransactions/{id}`
//!
//! ## Communisms
//! - `GET /communisms`, `POST /communisms` (guarded on the creator)
//! - `GET /communisms/{id}`, `PUT /communisms/{id}/participants/{user_id}`
//! - `POST /communisms/{id}/close`, `POST /communisms/{id}/abort`
//!
//! ## Refunds and ballots
//! - `GET /refunds`, `POST /refunds` (guarded on the creator)
//! - `GET /refunds/{id}`, `POST /refunds/{id}/resolve`, `POST /refunds/{id}/abort`
//! - `GET /ballots/{id}`, `POST /ballots/{id}/votes`
//! - `POST /ballots/{id}/resolve`, `POST /ballots/{id}/abort`
//!
//! ## Callbacks
//! - `GET /applications`, `POST /applications`
//! - `GET /callbacks`, `POST /callbacks`, `GET /callbacks/{id}`, `DELETE /callbacks/{id}`
//!
//! ## Example Usage
//!
//! ```bash
//! curl -i http://localhost:8095/users/2
//! curl -X POST -H 'If-Match: "<etag of user 2>"' \
//!      -d '{"sender_id": 2, "receiver_id": 3, "amount": 250, "reason": "lunch"}' \
//!      http://localhost:8095/transactions
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{header, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::consensus::VoteChoice;
use crate::db::callbacks::CreateCallbackInput;
use crate::db::communisms::CreateCommunismInput;
use crate::db::refunds::CreateRefundInput;
use crate::db::users::{CreateUserInput, UpdateUserInput};
use crate::error::LedgerError;
use crate::etag::Precondition;
use crate::money::Cents;
use crate::services::{self, HandlerResult, Services, SplitRequest, TransactionInput};
use crate::split::{Direction, Share, Sizing};

const DEFAULT_TRANSACTION_LIMIT: i64 = 100;

// ============================================================================
// Request bodies
// ============================================================================

#[derive(Debug, Deserialize)]
struct TransactionBody {
    sender_id: i64,
    receiver_id: i64,
    amount: serde_json::Number,
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Deserialize)]
struct SplitBody {
    one: i64,
    #[serde(default)]
    counterparties: Vec<Share>,
    #[serde(default)]
    base: Option<serde_json::Number>,
    #[serde(default)]
    total: Option<serde_json::Number>,
    direction: Direction,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    indicator: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommunismBody {
    amount: serde_json::Number,
    description: String,
    creator_id: i64,
    #[serde(default)]
    participants: Vec<Share>,
}

#[derive(Debug, Deserialize)]
struct ParticipantBody {
    quantity: i64,
}

#[derive(Debug, Deserialize)]
struct RefundBody {
    amount: serde_json::Number,
    description: String,
    creator_id: i64,
}

#[derive(Debug, Deserialize)]
struct VoteBody {
    user_id: i64,
    vote: i64,
}

#[derive(Debug, Deserialize)]
struct ApplicationBody {
    name: String,
}

impl SplitBody {
    fn into_request(self) -> Result<SplitRequest, LedgerError> {
        let sizing = match (self.base, self.total) {
            (Some(base), None) => Sizing::Base(Cents::try_from(&base)?),
            (None, Some(total)) => Sizing::Total(Cents::try_from(&total)?),
            _ => {
                return Err(LedgerError::InvalidInput(
                    "exactly one of base and total is required".into(),
                ))
            }
        };
        Ok(SplitRequest {
            one: self.one,
            counterparties: self.counterparties,
            sizing,
            direction: self.direction,
            reason: self.reason,
            indicator: self.indicator,
        })
    }
}

// ============================================================================
// Server
// ============================================================================

/// HTTP server state
pub struct HttpServer {
    services: Arc<Services>,
    bind_addr: SocketAddr,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(services: Arc<Services>, bind_addr: SocketAddr) -> Self {
        Self {
            services,
            bind_addr,
        }
    }

    /// Run the HTTP server
    pub async fn run(self: Arc<Self>) -> Result<(), LedgerError> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<(), LedgerError> {
        info!(addr = %listener.local_addr()?, "HTTP server listening");

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let server = self.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let server = server.clone();
                    async move { server.handle_request(req).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    warn!(addr = %remote_addr, error = %err, "Connection error");
                }
            });
        }
    }

    async fn handle_request(
        &self,
        req: Request<Incoming>,
    ) -> Result<Response<Full<Bytes>>, hyper::Error> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        debug!(method = %method, path = %path, "Incoming request");

        match self.route(req).await {
            Ok(response) => Ok(response),
            Err(e) => {
                let (status, _) = services::classify(&e);
                if status.is_server_error() {
                    error!(method = %method, path = %path, error = %e, "Request failed");
                } else {
                    debug!(method = %method, path = %path, error = %e, "Request rejected");
                }
                Ok(services::error_response(e))
            }
        }
    }

    /// Route requests to handlers
    async fn route(&self, req: Request<Incoming>) -> HandlerResult {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let query = req.uri().query().map(str::to_string);
        let pre = precondition(&req);
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        let s = &self.services;

        match (method, segments.as_slice()) {
            (Method::GET, ["health"]) => self.handle_health(),

            // Users
            (Method::GET, ["users"]) => Ok(services::ok(&s.users.list()?)),
            (Method::POST, ["users"]) => {
                let input: CreateUserInput = read_json(req).await?;
                Ok(services::tagged(StatusCode::CREATED, &s.users.create(&input)?))
            }
            (Method::GET, ["users", "community"]) => {
                Ok(services::tagged(StatusCode::OK, &s.users.community(&pre)?))
            }
            (Method::GET, ["users", id]) => {
                Ok(services::tagged(StatusCode::OK, &s.users.get(&pre, parse_id(id)?)?))
            }
            (Method::PATCH, ["users", id]) => {
                let id = parse_id(id)?;
                let input: UpdateUserInput = read_json(req).await?;
                Ok(services::tagged(StatusCode::OK, &s.users.update(&pre, id, &input)?))
            }
            (Method::GET, ["users", id, "transactions"]) => {
                let limit = query_param(query.as_deref(), "limit")
                    .map(|v| parse_id(&v))
                    .transpose()?
                    .unwrap_or(DEFAULT_TRANSACTION_LIMIT);
                Ok(services::ok(&s.ledger.list_for_user(parse_id(id)?, limit)?))
            }

            // Transactions
            (Method::POST, ["transactions"]) => {
                let body: TransactionBody = read_json(req).await?;
                let input = TransactionInput {
                    sender_id: body.sender_id,
                    receiver_id: body.receiver_id,
                    amount: Cents::try_from(&body.amount)?,
                    reason: body.reason,
                };
                Ok(services::tagged(
                    StatusCode::CREATED,
                    &s.ledger.create_transaction(&pre, &input)?,
                ))
            }
            (Method::GET, ["transactions", id]) => Ok(services::tagged(
                StatusCode::OK,
                &s.ledger.get_transaction(&pre, parse_id(id)?)?,
            )),
            (Method::POST, ["splits"]) => {
                let body: SplitBody = read_json(req).await?;
                let request = body.into_request()?;
                Ok(services::tagged(StatusCode::CREATED, &s.ledger.split(&pre, &request)?))
            }
            (Method::GET, ["multitransactions", id]) => Ok(services::tagged(
                StatusCode::OK,
                &s.ledger.get_multi_transaction(&pre, parse_id(id)?)?,
            )),

            // Communisms
            (Method::GET, ["communisms"]) => {
                Ok(services::ok(&s.communisms.list(active_only(query.as_deref()))?))
            }
            (Method::POST, ["communisms"]) => {
                let body: CommunismBody = read_json(req).await?;
                let input = CreateCommunismInput {
                    amount: Cents::try_from(&body.amount)?,
                    description: body.description,
                    creator_id: body.creator_id,
                    participants: body.participants,
                };
                Ok(services::tagged(StatusCode::CREATED, &s.communisms.create(&pre, &input)?))
            }
            (Method::GET, ["communisms", id]) => Ok(services::tagged(
                StatusCode::OK,
                &s.communisms.get(&pre, parse_id(id)?)?,
            )),
            (Method::PUT, ["communisms", id, "participants", user_id]) => {
                let (id, user_id) = (parse_id(id)?, parse_id(user_id)?);
                let body: ParticipantBody = read_json(req).await?;
                Ok(services::tagged(
                    StatusCode::OK,
                    &s.communisms.set_participant(&pre, id, user_id, body.quantity)?,
                ))
            }
            (Method::POST, ["communisms", id, "close"]) => Ok(services::tagged(
                StatusCode::OK,
                &s.communisms.close(&pre, parse_id(id)?)?,
            )),
            (Method::POST, ["communisms", id, "abort"]) => Ok(services::tagged(
                StatusCode::OK,
                &s.communisms.abort(&pre, parse_id(id)?)?,
            )),

            // Refunds
            (Method::GET, ["refunds"]) => {
                Ok(services::ok(&s.refunds.list(active_only(query.as_deref()))?))
            }
            (Method::POST, ["refunds"]) => {
                let body: RefundBody = read_json(req).await?;
                let input = CreateRefundInput {
                    amount: Cents::try_from(&body.amount)?,
                    description: body.description,
                    creator_id: body.creator_id,
                };
                Ok(services::tagged(StatusCode::CREATED, &s.refunds.create(&pre, &input)?))
            }
            (Method::GET, ["refunds", id]) => Ok(services::tagged(
                StatusCode::OK,
                &s.refunds.get(&pre, parse_id(id)?)?,
            )),
            (Method::POST, ["refunds", id, "resolve"]) => Ok(services::tagged(
                StatusCode::OK,
                &s.refunds.resolve(&pre, parse_id(id)?)?,
            )),
            (Method::POST, ["refunds", id, "abort"]) => Ok(services::tagged(
                StatusCode::OK,
                &s.refunds.abort(&pre, parse_id(id)?)?,
            )),

            // Ballots
            (Method::GET, ["ballots", id]) => Ok(services::tagged(
                StatusCode::OK,
                &s.refunds.get_ballot(&pre, parse_id(id)?)?,
            )),
            (Method::POST, ["ballots", id, "votes"]) => {
                let id = parse_id(id)?;
                let body: VoteBody = read_json(req).await?;
                let choice = VoteChoice::try_from(body.vote)?;
                Ok(services::tagged(
                    StatusCode::OK,
                    &s.refunds.cast_vote(&pre, id, body.user_id, choice)?,
                ))
            }
            (Method::POST, ["ballots", id, "resolve"]) => Ok(services::tagged(
                StatusCode::OK,
                &s.refunds.resolve_ballot(&pre, parse_id(id)?)?,
            )),
            (Method::POST, ["ballots", id, "abort"]) => Ok(services::tagged(
                StatusCode::OK,
                &s.refunds.abort_ballot(&pre, parse_id(id)?)?,
            )),

            // Callback registry
            (Method::GET, ["applications"]) => Ok(services::ok(&s.callbacks.list_applications()?)),
            (Method::POST, ["applications"]) => {
                let body: ApplicationBody = read_json(req).await?;
                Ok(services::tagged(
                    StatusCode::CREATED,
                    &s.callbacks.create_application(&body.name)?,
                ))
            }
            (Method::GET, ["callbacks"]) => Ok(services::ok(&s.callbacks.list()?)),
            (Method::POST, ["callbacks"]) => {
                let input: CreateCallbackInput = read_json(req).await?;
                Ok(services::tagged(StatusCode::CREATED, &s.callbacks.create(&input)?))
            }
            (Method::GET, ["callbacks", id]) => Ok(services::tagged(
                StatusCode::OK,
                &s.callbacks.get(&pre, parse_id(id)?)?,
            )),
            (Method::DELETE, ["callbacks", id]) => Ok(services::tagged(
                StatusCode::OK,
                &s.callbacks.delete(&pre, parse_id(id)?)?,
            )),

            (_, ["users" | "transactions" | "splits" | "multitransactions" | "communisms"
                | "refunds" | "ballots" | "applications" | "callbacks", ..]) => {
                Ok(services::method_not_allowed())
            }
            _ => Ok(services::not_found("Not Found")),
        }
    }

    /// Health check endpoint
    fn handle_health(&self) -> HandlerResult {
        let db = self.services.context.db.stats()?;
        let total_balance = self.services.users.total_balance()?;
        let body = serde_json::json!({
            "status": if total_balance == 0 { "ok" } else { "inconsistent" },
            "total_balance": total_balance,
            "database": db,
            "notifier": self.services.notifier_stats(),
        });
        Ok(services::ok(&body))
    }
}

fn precondition(req: &Request<Incoming>) -> Precondition {
    Precondition::from_header(
        req.headers()
            .get(header::IF_MATCH)
            .and_then(|v| v.to_str().ok()),
    )
}

fn parse_id(raw: &str) -> Result<i64, LedgerError> {
    raw.parse()
        .map_err(|_| LedgerError::InvalidInput(format!("{:?} is not a valid id", raw)))
}

fn query_param(query: Option<&str>, key: &str) -> Option<String> {
    query?.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        (k == key).then(|| v.to_string())
    })
}

fn active_only(query: Option<&str>) -> bool {
    matches!(query_param(query, "active").as_deref(), Some("true" | "1" | ""))
}

async fn read_json<T: DeserializeOwned>(req: Request<Incoming>) -> Result<T, LedgerError> {
    let body = req
        .collect()
        .await
        .map_err(|e| LedgerError::Internal(format!("Failed to read body: {}", e)))?
        .to_bytes();
    if body.is_empty() {
        return Err(LedgerError::InvalidInput("request body is empty".into()));
    }
    Ok(serde_json::from_slice(&body)?)
}
