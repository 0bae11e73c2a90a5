//! Node-side request signing.

use x25519_dalek::PublicKey;

use crate::error::{Error, Result};
use crate::shared::crypto::{self, KeyPair};
use crate::types::{Metadata, Request, RpcRequest, AUTH_TOKEN_HEADER, PUBLIC_KEY_HEADER};

/// Stamps a node's credentials onto its Fleet requests.
///
/// Every request gets the node's `public-key`; requests whose kind
/// requires it also get an `auth-token` computed over the request body.
#[derive(Clone)]
pub struct ClientAuth {
    key_pair: KeyPair,
    shared_key: [u8; 32],
}

impl ClientAuth {
    /// Credentials for talking to the broker whose key is `server_public_key`.
    pub fn new(key_pair: KeyPair, server_public_key: &PublicKey) -> Result<Self> {
        let shared_key = key_pair.shared_key(server_public_key)?;
        Ok(Self {
            key_pair,
            shared_key,
        })
    }

    /// Builds credentials from the metadata of a `CreateNode` response,
    /// which carries the broker's public key.
    ///
    /// # Errors
    ///
    /// [`Error::Crypto`] if the metadata has no usable `public-key` entry.
    pub fn from_response_metadata(key_pair: KeyPair, metadata: &Metadata) -> Result<Self> {
        let encoded = metadata
            .get(PUBLIC_KEY_HEADER)
            .ok_or_else(|| Error::Crypto("response carries no server public key".into()))?;
        let server_public_key = crypto::bytes_to_public_key(&crypto::decode_base64(encoded)?)?;
        Self::new(key_pair, &server_public_key)
    }

    /// The node's key pair.
    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    /// Adds the credentials `request` needs.
    pub fn sign(&self, request: &mut Request<RpcRequest>) -> Result<()> {
        let public_key = crypto::encode_base64(&self.key_pair.public_bytes());
        let token = if request.get_ref().kind().is_signed() {
            let body = request.get_ref().to_canonical_bytes()?;
            Some(crypto::encode_base64(&crypto::compute_hmac(&self.shared_key, &body)?))
        } else {
            None
        };

        let metadata = request.metadata_mut();
        metadata.insert(PUBLIC_KEY_HEADER, public_key);
        if let Some(token) = token {
            metadata.insert(AUTH_TOKEN_HEADER, token);
        }
        Ok(())
    }
}

impl std::fmt::Debug for ClientAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientAuth")
            .field("key_pair", &self.key_pair)
            .field("shared_key", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CreateNodeRequest, DeleteNodeRequest, Node};
    use pretty_assertions::assert_eq;

    #[test]
    fn create_node_carries_only_the_public_key() {
        let auth = ClientAuth::new(KeyPair::generate(), KeyPair::generate().public()).unwrap();
        let mut request = Request::new(RpcRequest::from(CreateNodeRequest {}));
        auth.sign(&mut request).unwrap();

        assert!(request.metadata().get(PUBLIC_KEY_HEADER).is_some());
        assert_eq!(request.metadata().get(AUTH_TOKEN_HEADER), None);
    }

    #[test]
    fn signed_token_verifies_under_the_shared_key() {
        let broker = KeyPair::generate();
        let node = KeyPair::generate();
        let auth = ClientAuth::new(node.clone(), broker.public()).unwrap();
        let mut request = Request::new(RpcRequest::from(DeleteNodeRequest {
            node: Node::new(3),
        }));
        auth.sign(&mut request).unwrap();

        let token = crypto::decode_base64(request.metadata().get(AUTH_TOKEN_HEADER).unwrap()).unwrap();
        let key = broker.shared_key(node.public()).unwrap();
        let body = request.get_ref().to_canonical_bytes().unwrap();
        assert!(crypto::verify_hmac(&key, &body, &token));
    }

    #[test]
    fn server_key_is_read_from_metadata() {
        let broker = KeyPair::generate();
        let mut metadata = Metadata::new();
        metadata.insert(PUBLIC_KEY_HEADER, crypto::encode_base64(&broker.public_bytes()));

        assert!(ClientAuth::from_response_metadata(KeyPair::generate(), &metadata).is_ok());
        assert!(ClientAuth::from_response_metadata(KeyPair::generate(), &Metadata::new()).is_err());
    }
}
