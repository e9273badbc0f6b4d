use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{
    Client, Compare, CompareOp, ConnectOptions, DeleteOptions, GetOptions as EtcdGetOptions,
    KvClient, SortOrder as EtcdSortOrder, SortTarget, Txn, TxnOp,
};

use crate::error::Result;
use crate::storage::kv::{GetOptions, KvStore, SortOrder};

/// etcd-backed store. The kv handle multiplexes one gRPC channel and is
/// cheap to clone per call.
pub struct EtcdKv {
    kv: KvClient,
}

impl EtcdKv {
    pub async fn connect(endpoints: &[String]) -> Result<Self> {
        let options = ConnectOptions::new().with_connect_timeout(Duration::from_secs(5));
        let client = Client::connect(endpoints, Some(options)).await?;
        Ok(Self {
            kv: client.kv_client(),
        })
    }

    fn read_options(opts: GetOptions) -> EtcdGetOptions {
        let mut etcd_opts = EtcdGetOptions::new().with_prefix();
        match opts.sort {
            SortOrder::Ascending => {
                etcd_opts = etcd_opts.with_sort(SortTarget::Key, EtcdSortOrder::Ascend);
            }
            SortOrder::Descending => {
                etcd_opts = etcd_opts.with_sort(SortTarget::Key, EtcdSortOrder::Descend);
            }
            SortOrder::Unsorted => {}
        }
        if opts.limit > 0 {
            etcd_opts = etcd_opts.with_limit(opts.limit as i64);
        }
        etcd_opts
    }
}

#[async_trait]
impl KvStore for EtcdKv {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.kv.clone().put(key, value, None).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let resp = self.kv.clone().get(key, None).await?;
        Ok(resp.kvs().first().map(|kv| kv.value().to_vec()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.kv.clone().delete(key, None).await?;
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<()> {
        self.kv
            .clone()
            .delete(prefix, Some(DeleteOptions::new().with_prefix()))
            .await?;
        Ok(())
    }

    async fn get_prefix(&self, prefix: &str, opts: GetOptions) -> Result<Vec<(String, Vec<u8>)>> {
        let resp = self
            .kv
            .clone()
            .get(prefix, Some(Self::read_options(opts)))
            .await?;
        Ok(resp
            .kvs()
            .iter()
            .map(|kv| {
                (
                    String::from_utf8_lossy(kv.key()).into_owned(),
                    kv.value().to_vec(),
                )
            })
            .collect())
    }

    async fn count_prefix(&self, prefix: &str) -> Result<usize> {
        let resp = self
            .kv
            .clone()
            .get(
                prefix,
                Some(EtcdGetOptions::new().with_prefix().with_count_only()),
            )
            .await?;
        Ok(resp.count() as usize)
    }

    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<bool> {
        let txn = Txn::new()
            .when(vec![Compare::value(key, CompareOp::Equal, expected)])
            .and_then(vec![TxnOp::delete(key, None)]);
        let resp = self.kv.clone().txn(txn).await?;
        Ok(resp.succeeded())
    }
}
