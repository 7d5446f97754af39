//! tonic client for the Viam data API.
//!
//! Sessions authenticate once with an API key and attach the returned access
//! token to every later call.

use crate::config::DatasetConfig;
use crate::dataset_client::{ConnectionError, DatasetConnector, DatasetSession};
use crate::proto::{
    AuthenticateRequest, AuthenticateResponse, BinaryDataByFilterRequest,
    BinaryDataByFilterResponse, BinaryDataByIdsRequest, BinaryDataByIdsResponse, BinaryId,
    Credentials, DataRequest, Filter, API_KEY_CREDENTIALS, AUTHENTICATE_PATH,
    BINARY_DATA_BY_FILTER_PATH, BINARY_DATA_BY_IDS_PATH,
};
use crate::record::{Cursor, DatasetFilter, IdentifierPage, Record, RecordIdentifier};
use async_trait::async_trait;
use parking_lot::Mutex;
use tonic::client::Grpc;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tonic::{Code, Request, Status};
use tracing::{debug, info, instrument};

/// Opens [`GrpcDatasetSession`]s using API key credentials
pub struct GrpcDatasetConnector {
    config: DatasetConfig,
}

impl GrpcDatasetConnector {
    pub fn new(config: DatasetConfig) -> Self {
        Self { config }
    }

    fn endpoint(&self) -> Result<Endpoint, ConnectionError> {
        let invalid = |message: String| ConnectionError::InvalidEndpoint {
            endpoint: self.config.endpoint.clone(),
            message,
        };

        let mut endpoint = Endpoint::from_shared(self.config.endpoint.clone())
            .map_err(|e| invalid(e.to_string()))?
            .connect_timeout(self.config.connect_timeout())
            .timeout(self.config.request_timeout());

        if self.config.endpoint.starts_with("https://") {
            endpoint = endpoint
                .tls_config(ClientTlsConfig::new())
                .map_err(|e| invalid(e.to_string()))?;
        }

        Ok(endpoint)
    }

    async fn authenticate(&self, grpc: &mut Grpc<Channel>) -> Result<String, ConnectionError> {
        let request = Request::new(AuthenticateRequest {
            entity: self.config.api_key_id.clone(),
            credentials: Some(Credentials {
                r#type: API_KEY_CREDENTIALS.to_string(),
                payload: self.config.api_key.clone(),
            }),
        });

        let response: AuthenticateResponse = unary(grpc, request, AUTHENTICATE_PATH)
            .await
            .map_err(|status| status_error("Authenticate", status))?;

        if response.access_token.is_empty() {
            return Err(ConnectionError::Unauthenticated(
                "Service returned an empty access token".to_string(),
            ));
        }

        Ok(response.access_token)
    }
}

#[async_trait]
impl DatasetConnector for GrpcDatasetConnector {
    #[instrument(skip(self), fields(endpoint = %self.config.endpoint))]
    async fn connect(&self) -> Result<Box<dyn DatasetSession>, ConnectionError> {
        let channel = self
            .endpoint()?
            .connect()
            .await
            .map_err(|e| ConnectionError::Transport(e.to_string()))?;

        let mut grpc = Grpc::new(channel);
        let access_token = self.authenticate(&mut grpc).await?;

        let authorization: MetadataValue<Ascii> = format!("Bearer {access_token}")
            .parse()
            .map_err(|_| {
                ConnectionError::Unauthenticated("Access token is not valid metadata".to_string())
            })?;

        info!(api_key_id = %self.config.api_key_id, "Connected to dataset service");

        Ok(Box::new(GrpcDatasetSession::new(grpc, authorization)))
    }
}

/// Authenticated session over a single gRPC channel
pub struct GrpcDatasetSession {
    grpc: Mutex<Option<Grpc<Channel>>>,
    authorization: MetadataValue<Ascii>,
}

impl GrpcDatasetSession {
    fn new(grpc: Grpc<Channel>, authorization: MetadataValue<Ascii>) -> Self {
        Self {
            grpc: Mutex::new(Some(grpc)),
            authorization,
        }
    }

    fn client(&self) -> Result<Grpc<Channel>, ConnectionError> {
        self.grpc.lock().clone().ok_or(ConnectionError::SessionClosed)
    }

    fn authorized<T>(&self, message: T) -> Request<T> {
        let mut request = Request::new(message);
        request
            .metadata_mut()
            .insert("authorization", self.authorization.clone());
        request
    }
}

#[async_trait]
impl DatasetSession for GrpcDatasetSession {
    #[instrument(skip(self, filter), fields(dataset_id = %filter.dataset_id))]
    async fn binary_ids_by_filter(
        &self,
        filter: &DatasetFilter,
        last: Option<Cursor>,
        limit: u64,
    ) -> Result<IdentifierPage, ConnectionError> {
        const METHOD: &str = "BinaryDataByFilter";

        let mut grpc = self.client()?;
        let request = BinaryDataByFilterRequest {
            data_request: Some(DataRequest {
                filter: Some(Filter {
                    dataset_id: filter.dataset_id.clone(),
                }),
                limit,
                last: last.map(|c| c.as_str().to_string()).unwrap_or_default(),
            }),
            include_binary: false,
            count_only: false,
        };

        let response: BinaryDataByFilterResponse =
            unary(&mut grpc, self.authorized(request), BINARY_DATA_BY_FILTER_PATH)
                .await
                .map_err(|status| status_error(METHOD, status))?;

        let identifiers = response
            .data
            .iter()
            .enumerate()
            .map(|(index, data)| {
                data.identifier()
                    .ok_or_else(|| ConnectionError::MalformedResponse {
                        method: METHOD,
                        message: format!("entry {index} has no metadata"),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!(count = identifiers.len(), "Received identifier page");

        Ok(IdentifierPage {
            identifiers,
            next: Cursor::from_token(response.last),
        })
    }

    #[instrument(skip(self, identifiers), fields(count = identifiers.len()))]
    async fn binary_data_by_ids(
        &self,
        identifiers: &[RecordIdentifier],
    ) -> Result<Vec<Record>, ConnectionError> {
        let mut grpc = self.client()?;
        let request = BinaryDataByIdsRequest {
            include_binary: true,
            binary_ids: identifiers.iter().map(BinaryId::from).collect(),
        };

        let response: BinaryDataByIdsResponse =
            unary(&mut grpc, self.authorized(request), BINARY_DATA_BY_IDS_PATH)
                .await
                .map_err(|status| status_error("BinaryDataByIDs", status))?;

        Ok(response.data.into_iter().map(Record::from).collect())
    }

    async fn close(&self) {
        if self.grpc.lock().take().is_some() {
            info!("Dataset session closed");
        }
    }
}

async fn unary<Req, Resp>(
    grpc: &mut Grpc<Channel>,
    request: Request<Req>,
    path: &'static str,
) -> Result<Resp, Status>
where
    Req: prost::Message + Send + Sync + 'static,
    Resp: prost::Message + Default + Send + Sync + 'static,
{
    grpc.ready()
        .await
        .map_err(|e| Status::new(Code::Unavailable, format!("Service was not ready: {e}")))?;

    let codec: ProstCodec<Req, Resp> = ProstCodec::default();
    let response = grpc
        .unary(request, PathAndQuery::from_static(path), codec)
        .await?;

    Ok(response.into_inner())
}

fn status_error(method: &'static str, status: Status) -> ConnectionError {
    match status.code() {
        Code::Unauthenticated | Code::PermissionDenied => {
            ConnectionError::Unauthenticated(status.message().to_string())
        }
        code => ConnectionError::Status {
            method,
            code,
            message: status.message().to_string(),
        },
    }
}
