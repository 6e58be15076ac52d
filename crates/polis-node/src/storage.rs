//! Persistent storage using RocksDB.

use crate::error::{Error, Result};
use ed25519_dalek::SigningKey;
use polis_crdt::GlobalState;
use polis_executor::ExecutorCursor;
use rocksdb::{Options, WriteBatch, DB};
use std::path::Path;

const STATE_KEY: &[u8] = b"state:snapshot";
const CURSOR_KEY: &[u8] = b"executor:cursor";
const NODE_KEY: &[u8] = b"node:signing_key";

/// Local persistence for one node.
pub struct Storage {
    db: DB,
}

impl Storage {
    /// Open or create storage at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;
        Ok(Self { db })
    }

    fn put_json<T: serde::Serialize>(&self, key: &[u8], value: &T) -> Result<()> {
        self.db.put(key, serde_json::to_vec(value)?)?;
        Ok(())
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        match self.db.get(key)? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    // --- State ---

    pub fn put_state(&self, state: &GlobalState) -> Result<()> {
        self.put_json(STATE_KEY, state)
    }

    pub fn load_state(&self) -> Result<Option<GlobalState>> {
        self.get_json(STATE_KEY)
    }

    // --- Executor ---

    pub fn put_cursor(&self, cursor: &ExecutorCursor) -> Result<()> {
        self.put_json(CURSOR_KEY, cursor)
    }

    pub fn load_cursor(&self) -> Result<ExecutorCursor> {
        Ok(self.get_json(CURSOR_KEY)?.unwrap_or_default())
    }

    /// Write state and cursor in one atomic batch.
    pub fn put_checkpoint(&self, state: &GlobalState, cursor: &ExecutorCursor) -> Result<()> {
        let mut batch = WriteBatch::default();
        batch.put(STATE_KEY, serde_json::to_vec(state)?);
        batch.put(CURSOR_KEY, serde_json::to_vec(cursor)?);
        self.db.write(batch)?;
        Ok(())
    }

    // --- Node Identity ---

    /// Get or create the node's signing key (persistent identity).
    pub fn get_or_create_node_key(&self) -> Result<SigningKey> {
        if let Some(data) = self.db.get(NODE_KEY)? {
            let bytes: [u8; 32] = data
                .as_slice()
                .try_into()
                .map_err(|_| Error::Storage("Invalid stored key".into()))?;
            Ok(SigningKey::from_bytes(&bytes))
        } else {
            let mut rng = rand::thread_rng();
            let signing_key = SigningKey::generate(&mut rng);
            self.db.put(NODE_KEY, signing_key.as_bytes())?;
            Ok(signing_key)
        }
    }
}
