//! The network service we drain the group outputs from.

use crate::{
    config::NetworkConfig,
    mtgsyncd::{OutputState, Timestamp},
};

use jsonrpc::{arg, client::Client, simple_http, simple_http::SimpleHttpTransport};
use serde::{de, de::DeserializeOwned, Deserialize, Deserializer};

fn deserialize_base64<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let data_str = String::deserialize(deserializer)?;
    base64::decode(&data_str).map_err(de::Error::custom)
}

/// A fungible output owned by the group, as reported by the network service
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MultisigOutput {
    pub output_id: String,
    pub asset_id: String,
    pub transaction_hash: String,
    pub output_index: u32,
    pub amount: String,
    pub threshold: u8,
    pub members: Vec<String>,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub memo: String,
    pub state: OutputState,
    /// The (possibly partially) signed transaction spending this output, empty if none.
    #[serde(deserialize_with = "deserialize_base64", default)]
    pub signed_tx: Vec<u8>,
    pub updated_at: Timestamp,
}

/// A non-fungible output owned by the group, as reported by the network service
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CollectibleOutput {
    pub output_id: String,
    pub token_id: String,
    pub transaction_hash: String,
    pub output_index: u32,
    pub amount: String,
    pub threshold: u8,
    pub members: Vec<String>,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub memo: String,
    pub state: OutputState,
    #[serde(deserialize_with = "deserialize_base64", default)]
    pub signed_tx: Vec<u8>,
    pub updated_at: Timestamp,
}

/// An error while fetching a page of outputs. They are all considered temporary.
#[derive(Debug)]
pub enum SourceError {
    Server(jsonrpc::Error),
    Custom(String),
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Server(ref e) => write!(f, "Network service error: {}", e),
            Self::Custom(ref s) => write!(f, "Outputs source error: {}", s),
        }
    }
}

impl std::error::Error for SourceError {}

impl From<jsonrpc::Error> for SourceError {
    fn from(e: jsonrpc::Error) -> Self {
        Self::Server(e)
    }
}

impl From<simple_http::Error> for SourceError {
    fn from(e: simple_http::Error) -> Self {
        Self::Server(jsonrpc::Error::Transport(Box::new(e)))
    }
}

/// The paginated read API of the network service.
///
/// Both calls return at most `limit` outputs of the group, sorted by ascending update time,
/// starting at `offset` included.
pub trait OutputsSource: Send + Sync {
    fn read_multisig_outputs(
        &self,
        members: &[String],
        threshold: u8,
        offset: Timestamp,
        limit: usize,
    ) -> Result<Vec<MultisigOutput>, SourceError>;

    fn read_collectible_outputs(
        &self,
        members: &[String],
        threshold: u8,
        offset: Timestamp,
        limit: usize,
    ) -> Result<Vec<CollectibleOutput>, SourceError>;
}

/// Talks to the network service through JSONRPC over HTTP.
pub struct JsonRpcSource {
    client: Client,
}

impl JsonRpcSource {
    pub fn new(config: &NetworkConfig) -> Result<JsonRpcSource, SourceError> {
        let mut builder = SimpleHttpTransport::builder()
            .url(&config.addr)?
            .timeout(config.timeout);
        if let Some(ref auth) = config.auth {
            builder = builder.cookie_auth(auth);
        }

        Ok(JsonRpcSource {
            client: Client::with_transport(builder.build()),
        })
    }

    fn make_request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[Box<serde_json::value::RawValue>],
    ) -> Result<T, SourceError> {
        let req = self.client.build_request(method, params);
        log::trace!("Sending to network service: {:?}", req);
        let resp = self.client.send_request(req)?;
        Ok(resp.result()?)
    }

    fn read_outputs<T: DeserializeOwned>(
        &self,
        method: &str,
        members: &[String],
        threshold: u8,
        offset: Timestamp,
        limit: usize,
    ) -> Result<Vec<T>, SourceError> {
        let params = [
            arg(members),
            arg(threshold),
            arg(offset.as_nanos()),
            arg(limit),
        ];
        self.make_request(method, &params)
    }
}

impl OutputsSource for JsonRpcSource {
    fn read_multisig_outputs(
        &self,
        members: &[String],
        threshold: u8,
        offset: Timestamp,
        limit: usize,
    ) -> Result<Vec<MultisigOutput>, SourceError> {
        self.read_outputs("readmultisigoutputs", members, threshold, offset, limit)
    }

    fn read_collectible_outputs(
        &self,
        members: &[String],
        threshold: u8,
        offset: Timestamp,
        limit: usize,
    ) -> Result<Vec<CollectibleOutput>, SourceError> {
        self.read_outputs("readcollectibleoutputs", members, threshold, offset, limit)
    }
}
