//! Resource store the reconcilers talk to.
//!
//! Reconcilers never hold a `kube::Api` directly. They read and write through [`ObjectStore`],
//! which is backed by the API server in production ([`KubeStore`]) and by [`memory::MemoryStore`]
//! in tests.

use std::{fmt::Debug, marker::PhantomData};

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{DeleteParams, ListParams, PostParams},
    Api, Client, Resource,
};
use serde::{de::DeserializeOwned, Serialize};
use snafu::{OptionExt as _, ResultExt as _};

use crate::{KubeSnafu, MissingObjectKeySnafu, Result, SerializationSnafu};

pub mod memory;

/// Outcome of a create call. Creating an object whose name is already taken is not an error:
/// child names are deterministic, so a second create means another pass got there first.
#[derive(Clone, Debug, PartialEq)]
pub enum Created<K> {
    New(K),
    AlreadyExists,
}

#[async_trait]
pub trait ObjectStore<K>: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>>;

    /// List objects in `namespace`, optionally filtered by an equality label selector.
    async fn list(&self, namespace: &str, labels: Option<&str>) -> Result<Vec<K>>;

    async fn create(&self, namespace: &str, obj: &K) -> Result<Created<K>>;

    /// Write `obj.status` back, failing if the stored object changed since `obj` was read.
    async fn replace_status(&self, obj: &K) -> Result<K>;

    /// Delete an object. Deleting something that is already gone succeeds.
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;
}

/// [`ObjectStore`] backed by the Kubernetes API server.
pub struct KubeStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeStore<K> {
    pub fn new(client: Client) -> Self {
        Self { client, _kind: PhantomData }
    }
}

impl<K> KubeStore<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl<K> ObjectStore<K> for KubeStore<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + DeserializeOwned
        + Serialize
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        self.api(namespace).get_opt(name).await.with_context(|_| KubeSnafu {
            msg: format!("Failed to get {} {namespace}/{name}", K::kind(&())),
        })
    }

    async fn list(&self, namespace: &str, labels: Option<&str>) -> Result<Vec<K>> {
        let mut lp = ListParams::default();
        if let Some(labels) = labels {
            lp = lp.labels(labels);
        }

        let list = self.api(namespace).list(&lp).await.with_context(|_| KubeSnafu {
            msg: format!("Failed to list {} in {namespace}", K::kind(&())),
        })?;
        Ok(list.items)
    }

    async fn create(&self, namespace: &str, obj: &K) -> Result<Created<K>> {
        match self.api(namespace).create(&PostParams::default(), obj).await {
            Ok(created) => Ok(Created::New(created)),
            Err(kube::Error::Api(resp)) if resp.code == 409 && resp.reason == "AlreadyExists" => {
                Ok(Created::AlreadyExists)
            }
            Err(source) => Err(source).with_context(|_| KubeSnafu {
                msg: format!("Failed to create {} in {namespace}", K::kind(&())),
            }),
        }
    }

    async fn replace_status(&self, obj: &K) -> Result<K> {
        let kind = K::kind(&()).to_string();
        let name = obj.meta().name.clone().unwrap_or_default();
        let namespace = obj
            .meta()
            .namespace
            .clone()
            .with_context(|| MissingObjectKeySnafu { kind: kind.clone(), name: name.clone() })?;

        let data = serde_json::to_vec(obj).context(SerializationSnafu)?;
        self.api(&namespace)
            .replace_status(&name, &PostParams::default(), data)
            .await
            .with_context(|_| KubeSnafu {
                msg: format!("Failed to update {kind} {namespace}/{name} status"),
            })
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        match self.api(namespace).delete(name, &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(source) => Err(source).with_context(|_| KubeSnafu {
                msg: format!("Failed to delete {} {namespace}/{name}", K::kind(&())),
            }),
        }
    }
}
