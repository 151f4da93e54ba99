// Sender-key distribution tracker
//
// One row per (account, distribution id, device) asserts that the device
// has received the sender key of that distribution and that it has not been
// invalidated since. Rows never expire; the protocol engine invalidates
// them explicitly on rotation, session reset, contact removal and account
// teardown.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::db::schema::SENDER_KEY_SHARED_TABLE as TABLE;
use crate::db::{BackendConnection, Row, Value};
use crate::directory::{AccountDirectory, RecipientDirectory};
use crate::ids::{AccountId, DeviceAddress, DistributionId};
use crate::{Result, StoreError};

const ACCOUNT_UUID: &str = "account_uuid";
const DISTRIBUTION_ID: &str = "distribution_id";
const ADDRESS: &str = "address";
const DEVICE: &str = "device";

#[derive(Clone)]
pub struct SenderKeySharedTable {
    account: AccountId,
    conn: Arc<BackendConnection>,
}

impl SenderKeySharedTable {
    pub fn new(account: AccountId, conn: Arc<BackendConnection>) -> Self {
        Self { account, conn }
    }

    pub fn account_id(&self) -> &AccountId {
        &self.account
    }

    /// Devices currently holding the key of `distribution_id`.
    pub fn get_recipients(&self, distribution_id: &DistributionId) -> Result<HashSet<DeviceAddress>> {
        let sql = format!(
            "SELECT {ADDRESS}, {DEVICE} FROM {TABLE} WHERE {ACCOUNT_UUID} = ? AND {DISTRIBUTION_ID} = ?"
        );
        let rows = self.conn.query(
            &op_name("get_recipients"),
            &sql,
            &[self.account_param(), Value::from(distribution_id.as_str())],
        )?;
        rows.iter().map(device_from_row).collect()
    }

    /// Targets that do not hold the key of `distribution_id` yet and still
    /// need a distribution message.
    pub fn devices_needing_key<'a, I>(
        &self,
        distribution_id: &DistributionId,
        targets: I,
    ) -> Result<HashSet<DeviceAddress>>
    where
        I: IntoIterator<Item = &'a DeviceAddress>,
    {
        let holders = self.get_recipients(distribution_id)?;
        Ok(targets
            .into_iter()
            .filter(|device| !holders.contains(*device))
            .cloned()
            .collect())
    }

    /// Record that `devices` received the key of `distribution_id`.
    ///
    /// Idempotent. Issued as one batch: on error nothing was persisted and
    /// the whole call has to be retried.
    pub fn mark_distributed<'a, I>(&self, distribution_id: &DistributionId, devices: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a DeviceAddress>,
    {
        let devices = validated(devices)?;
        let sql = self
            .conn
            .insert_or_replace_sql(TABLE, &[ACCOUNT_UUID, ADDRESS, DEVICE, DISTRIBUTION_ID]);
        let batch: Vec<Vec<Value>> = devices
            .iter()
            .map(|device| {
                vec![
                    self.account_param(),
                    Value::from(device.identity.as_str()),
                    Value::from(device.device_id),
                    Value::from(distribution_id.as_str()),
                ]
            })
            .collect();

        self.conn
            .execute_batch(&op_name("mark_distributed"), &sql, &batch)?;
        debug!(
            "Marked sender key {} shared with {} device(s)",
            distribution_id,
            batch.len()
        );
        Ok(())
    }

    /// Forget that `devices` hold the key of `distribution_id`, e.g. after
    /// their session was reset.
    pub fn revoke<'a, I>(&self, distribution_id: &DistributionId, devices: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a DeviceAddress>,
    {
        let devices = validated(devices)?;
        let sql = format!(
            "DELETE FROM {TABLE} WHERE {ACCOUNT_UUID} = ? AND {DISTRIBUTION_ID} = ? AND {ADDRESS} = ? AND {DEVICE} = ?"
        );
        let batch: Vec<Vec<Value>> = devices
            .iter()
            .map(|device| {
                vec![
                    self.account_param(),
                    Value::from(distribution_id.as_str()),
                    Value::from(device.identity.as_str()),
                    Value::from(device.device_id),
                ]
            })
            .collect();

        self.conn.execute_batch(&op_name("revoke"), &sql, &batch)?;
        Ok(())
    }

    /// Forget `devices` under every distribution id of this account.
    pub fn revoke_devices_everywhere<'a, I>(&self, devices: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a DeviceAddress>,
    {
        let devices = validated(devices)?;
        let sql = format!("DELETE FROM {TABLE} WHERE {ACCOUNT_UUID} = ? AND {ADDRESS} = ? AND {DEVICE} = ?");
        let batch: Vec<Vec<Value>> = devices
            .iter()
            .map(|device| {
                vec![
                    self.account_param(),
                    Value::from(device.identity.as_str()),
                    Value::from(device.device_id),
                ]
            })
            .collect();

        self.conn
            .execute_batch(&op_name("revoke_devices_everywhere"), &sql, &batch)?;
        Ok(())
    }

    /// Drop every record of `distribution_id`; called when the key rotates.
    /// Returns the number of removed records.
    pub fn revoke_all_for_distribution(&self, distribution_id: &DistributionId) -> Result<u64> {
        let sql = format!("DELETE FROM {TABLE} WHERE {ACCOUNT_UUID} = ? AND {DISTRIBUTION_ID} = ?");
        let removed = self.conn.execute(
            &op_name("revoke_all_for_distribution"),
            &sql,
            &[self.account_param(), Value::from(distribution_id.as_str())],
        )?;
        debug!("Sender key {} rotated, cleared {} record(s)", distribution_id, removed);
        Ok(removed)
    }

    /// Drop every record of every device of `identity`, across all
    /// distribution ids of this account.
    pub fn revoke_all_for_recipient(&self, identity: &str) -> Result<u64> {
        if identity.is_empty() {
            return Err(StoreError::InvalidInput("empty recipient identity".to_string()));
        }
        let sql = format!("DELETE FROM {TABLE} WHERE {ACCOUNT_UUID} = ? AND {ADDRESS} = ?");
        self.conn.execute(
            &op_name("revoke_all_for_recipient"),
            &sql,
            &[self.account_param(), Value::from(identity)],
        )
    }

    /// Like [`Self::revoke_all_for_recipient`] for a contact that still has to
    /// be resolved. An unknown contact has nothing to revoke.
    pub fn revoke_all_for_contact(&self, directory: &dyn RecipientDirectory, contact: &str) -> Result<u64> {
        match directory.identity_of(contact)? {
            Some(identity) => self.revoke_all_for_recipient(&identity),
            None => {
                debug!("Contact {} has no known identity, nothing to revoke", contact);
                Ok(0)
            }
        }
    }

    pub fn is_multi_device(&self, accounts: &dyn AccountDirectory) -> Result<bool> {
        accounts.is_multi_device(&self.account)
    }

    /// Purge every record owned by `account`, whatever its distribution id.
    /// Only this table is touched.
    pub fn delete_account(conn: &BackendConnection, account: &AccountId) -> Result<u64> {
        let sql = format!("DELETE FROM {TABLE} WHERE {ACCOUNT_UUID} = ?");
        conn.execute(
            &op_name("delete_account"),
            &sql,
            &[Value::from(account.as_str())],
        )
    }

    fn account_param(&self) -> Value {
        Value::from(self.account.as_str())
    }
}

fn op_name(operation: &str) -> String {
    format!("{TABLE}_{operation}")
}

fn validated<'a, I>(devices: I) -> Result<BTreeSet<&'a DeviceAddress>>
where
    I: IntoIterator<Item = &'a DeviceAddress>,
{
    let devices: BTreeSet<&DeviceAddress> = devices.into_iter().collect();
    if let Some(bad) = devices
        .iter()
        .find(|d| d.identity.is_empty() || d.device_id == 0)
    {
        return Err(StoreError::InvalidInput(format!("invalid device address {:?}", bad)));
    }
    Ok(devices)
}

fn device_from_row(row: &Row) -> Result<DeviceAddress> {
    match row.as_slice() {
        [Value::Text(address), Value::Int(device)] => {
            let device_id = u32::try_from(*device)
                .ok()
                .filter(|id| *id > 0)
                .ok_or_else(|| StoreError::CorruptRow {
                    table: TABLE,
                    reason: format!("device id {} out of range", device),
                })?;
            Ok(DeviceAddress::new(address.clone(), device_id))
        }
        other => Err(StoreError::CorruptRow {
            table: TABLE,
            reason: format!("unexpected row shape {:?}", other),
        }),
    }
}
