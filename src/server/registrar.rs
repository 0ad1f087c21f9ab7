//! Server self-registration
//!
//! Ensures the registry root exists as a persistent node, then creates an
//! ephemeral sequential child carrying this server's location. The child
//! lives exactly as long as the coordination session; there is no
//! re-registration after a session loss.

use crate::common::{join_path, Error, Result};
use crate::coordination::{Coordination, CreateMode};
use bytes::Bytes;
use std::sync::{Arc, Mutex};

/// Name prefix for server nodes; the service appends the sequence number
pub const NODE_PREFIX: &str = "x_";

pub struct Registrar<C> {
    coordination: Arc<C>,
    registered: Mutex<Option<String>>,
}

impl<C: Coordination> Registrar<C> {
    pub fn new(coordination: Arc<C>) -> Self {
        Self {
            coordination,
            registered: Mutex::new(None),
        }
    }

    /// Path of this server's node, once registered
    pub fn registered_path(&self) -> Option<String> {
        self.registered.lock().ok().and_then(|path| path.clone())
    }

    /// Register `location` under `root`; returns the created node path.
    ///
    /// May succeed at most once per registrar.
    pub async fn register(&self, root: &str, location: &str) -> Result<String> {
        if let Some(path) = self.registered_path() {
            return Err(Error::AlreadyRegistered(path));
        }

        self.ensure_root(root).await?;

        let path = self
            .coordination
            .create_node(
                &join_path(root, NODE_PREFIX),
                Bytes::copy_from_slice(location.as_bytes()),
                CreateMode::EphemeralSequential,
            )
            .await?;

        let mut registered = self
            .registered
            .lock()
            .map_err(|_| Error::Internal("registrar lock poisoned".into()))?;
        if let Some(existing) = registered.as_ref() {
            // a concurrent call won; ours expires with the session
            return Err(Error::AlreadyRegistered(existing.clone()));
        }
        *registered = Some(path.clone());

        tracing::info!("Registered {} at {}", location, path);
        Ok(path)
    }

    async fn ensure_root(&self, root: &str) -> Result<()> {
        if self.coordination.exists(root).await? {
            return Ok(());
        }
        tracing::info!("Creating registry root {}", root);
        match self
            .coordination
            .create_node(root, Bytes::new(), CreateMode::Persistent)
            .await
        {
            Ok(_) => Ok(()),
            // another server created it first
            Err(Error::NodeExists(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::Namespace;

    #[tokio::test]
    async fn test_register_creates_root_and_ephemeral_child() {
        let ns = Namespace::new();
        let (session, _events) = ns.connect().unwrap();
        let registrar = Registrar::new(Arc::new(session));

        let path = registrar.register("/chorano", "localhost:8111").await.unwrap();
        assert_eq!(path, "/chorano/x_0000000000");
        assert_eq!(registrar.registered_path().as_deref(), Some(path.as_str()));

        let (observer, _observer_events) = ns.connect().unwrap();
        assert_eq!(observer.get_data_now(&path, false).unwrap(), "localhost:8111");
        assert_eq!(observer.get_data_now("/chorano", false).unwrap(), "");
    }

    #[tokio::test]
    async fn test_register_twice_fails() {
        let ns = Namespace::new();
        let (session, _events) = ns.connect().unwrap();
        let registrar = Registrar::new(Arc::new(session));

        registrar.register("/chorano", "localhost:8111").await.unwrap();
        let again = registrar.register("/chorano", "localhost:8111").await;
        assert!(matches!(again, Err(Error::AlreadyRegistered(_))));
    }

    #[tokio::test]
    async fn test_node_expires_with_session() {
        let ns = Namespace::new();
        let (observer, _observer_events) = ns.connect().unwrap();

        {
            let (session, _events) = ns.connect().unwrap();
            let registrar = Registrar::new(Arc::new(session));
            registrar.register("/chorano", "localhost:8111").await.unwrap();
            assert_eq!(observer.list_children_now("/chorano", false).unwrap().len(), 1);
        }

        // root is durable, the registration is not
        assert!(observer.exists_now("/chorano").unwrap());
        assert!(observer.list_children_now("/chorano", false).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_servers_get_distinct_nodes() {
        let ns = Namespace::new();
        let (a, _a_events) = ns.connect().unwrap();
        let (b, _b_events) = ns.connect().unwrap();

        let first_registrar = Registrar::new(Arc::new(a));
        let second_registrar = Registrar::new(Arc::new(b));
        let first = first_registrar
            .register("/chorano", "localhost:8111")
            .await
            .unwrap();
        let second = second_registrar
            .register("/chorano", "localhost:8112")
            .await
            .unwrap();
        assert_ne!(first, second);
        assert!(first < second);

        let (observer, _observer_events) = ns.connect().unwrap();
        assert_eq!(
            observer.list_children_now("/chorano", false).unwrap(),
            vec!["x_0000000000", "x_0000000001"]
        );
    }
}
