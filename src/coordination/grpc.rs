use super::CoordinationStore;
use crate::rpc::coordination_store_client::CoordinationStoreClient;
use crate::rpc::coordination_store_server::CoordinationStore as CoordinationStoreRpc;
use crate::rpc::{
    internal, CasRequest, CasResponse, Empty, ExistsResponse, FieldRequest, FieldsResponse,
    HashCasRequest, HashSetRequest, KeyRequest, SetRequest, ValueResponse,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tonic::transport::Channel;
use tonic::{Request, Response, Status};

/// Client for a coordination store served by `wci-store`.
#[derive(Clone, Debug)]
pub struct GrpcCoordinationStore {
    client: CoordinationStoreClient<Channel>,
}

impl GrpcCoordinationStore {
    pub async fn connect(addr: &str) -> Result<Self> {
        let client = CoordinationStoreClient::connect(format!("http://{addr}"))
            .await
            .with_context(|| format!("connecting to coordination store at {addr}"))?;
        Ok(Self { client })
    }

    // Tonic clients are cheap to clone and need `&mut self` per call.
    fn client(&self) -> CoordinationStoreClient<Channel> {
        self.client.clone()
    }
}

#[tonic::async_trait]
impl CoordinationStore for GrpcCoordinationStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let request = Request::new(KeyRequest { key: key.into() });
        let response = self.client().get(request).await.context("store get")?;
        Ok(response.into_inner().value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let request = Request::new(SetRequest {
            key: key.into(),
            value: value.into(),
        });
        self.client().set(request).await.context("store set")?;
        Ok(())
    }

    async fn compare_and_swap(&self, key: &str, expected: Option<&str>, value: &str) -> Result<bool> {
        let request = Request::new(CasRequest {
            key: key.into(),
            expected: expected.map(str::to_string),
            value: value.into(),
        });
        let response = self
            .client()
            .compare_and_swap(request)
            .await
            .context("store compare_and_swap")?;
        Ok(response.into_inner().swapped)
    }

    async fn hash_get(&self, hash: &str, field: &str) -> Result<Option<String>> {
        let request = Request::new(FieldRequest {
            hash: hash.into(),
            field: field.into(),
        });
        let response = self.client().hash_get(request).await.context("store hash_get")?;
        Ok(response.into_inner().value)
    }

    async fn hash_set(&self, hash: &str, field: &str, value: &str) -> Result<()> {
        let request = Request::new(HashSetRequest {
            hash: hash.into(),
            field: field.into(),
            value: value.into(),
        });
        self.client().hash_set(request).await.context("store hash_set")?;
        Ok(())
    }

    async fn hash_exists(&self, hash: &str, field: &str) -> Result<bool> {
        let request = Request::new(FieldRequest {
            hash: hash.into(),
            field: field.into(),
        });
        let response = self
            .client()
            .hash_exists(request)
            .await
            .context("store hash_exists")?;
        Ok(response.into_inner().exists)
    }

    async fn hash_compare_and_swap(
        &self,
        hash: &str,
        field: &str,
        expected: Option<&str>,
        value: &str,
    ) -> Result<bool> {
        let request = Request::new(HashCasRequest {
            hash: hash.into(),
            field: field.into(),
            expected: expected.map(str::to_string),
            value: value.into(),
        });
        let response = self
            .client()
            .hash_compare_and_swap(request)
            .await
            .context("store hash_compare_and_swap")?;
        Ok(response.into_inner().swapped)
    }

    async fn hash_fields(&self, hash: &str) -> Result<Vec<String>> {
        let request = Request::new(KeyRequest { key: hash.into() });
        let response = self
            .client()
            .hash_fields(request)
            .await
            .context("store hash_fields")?;
        Ok(response.into_inner().fields)
    }

    async fn clear(&self) -> Result<()> {
        self.client().clear(Request::new(Empty {})).await.context("store clear")?;
        Ok(())
    }
}

/// Serves any [`CoordinationStore`] over gRPC.
#[derive(Clone)]
pub struct StoreService {
    store: Arc<dyn CoordinationStore>,
}

impl StoreService {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }
}

#[tonic::async_trait]
impl CoordinationStoreRpc for StoreService {
    async fn get(&self, request: Request<KeyRequest>) -> Result<Response<ValueResponse>, Status> {
        let value = self.store.get(&request.get_ref().key).await.map_err(internal)?;
        Ok(Response::new(ValueResponse { value }))
    }

    async fn set(&self, request: Request<SetRequest>) -> Result<Response<Empty>, Status> {
        let SetRequest { key, value } = request.into_inner();
        self.store.set(&key, &value).await.map_err(internal)?;
        Ok(Response::new(Empty {}))
    }

    async fn compare_and_swap(&self, request: Request<CasRequest>) -> Result<Response<CasResponse>, Status> {
        let CasRequest { key, expected, value } = request.into_inner();
        let swapped = self
            .store
            .compare_and_swap(&key, expected.as_deref(), &value)
            .await
            .map_err(internal)?;
        Ok(Response::new(CasResponse { swapped }))
    }

    async fn hash_get(&self, request: Request<FieldRequest>) -> Result<Response<ValueResponse>, Status> {
        let FieldRequest { hash, field } = request.into_inner();
        let value = self.store.hash_get(&hash, &field).await.map_err(internal)?;
        Ok(Response::new(ValueResponse { value }))
    }

    async fn hash_set(&self, request: Request<HashSetRequest>) -> Result<Response<Empty>, Status> {
        let HashSetRequest { hash, field, value } = request.into_inner();
        self.store.hash_set(&hash, &field, &value).await.map_err(internal)?;
        Ok(Response::new(Empty {}))
    }

    async fn hash_exists(&self, request: Request<FieldRequest>) -> Result<Response<ExistsResponse>, Status> {
        let FieldRequest { hash, field } = request.into_inner();
        let exists = self.store.hash_exists(&hash, &field).await.map_err(internal)?;
        Ok(Response::new(ExistsResponse { exists }))
    }

    async fn hash_compare_and_swap(
        &self,
        request: Request<HashCasRequest>,
    ) -> Result<Response<CasResponse>, Status> {
        let HashCasRequest {
            hash,
            field,
            expected,
            value,
        } = request.into_inner();
        let swapped = self
            .store
            .hash_compare_and_swap(&hash, &field, expected.as_deref(), &value)
            .await
            .map_err(internal)?;
        Ok(Response::new(CasResponse { swapped }))
    }

    async fn hash_fields(&self, request: Request<KeyRequest>) -> Result<Response<FieldsResponse>, Status> {
        let fields = self
            .store
            .hash_fields(&request.get_ref().key)
            .await
            .map_err(internal)?;
        Ok(Response::new(FieldsResponse { fields }))
    }

    async fn clear(&self, _request: Request<Empty>) -> Result<Response<Empty>, Status> {
        self.store.clear().await.map_err(internal)?;
        Ok(Response::new(Empty {}))
    }
}
