//! The BRC-100 method-surface façade: wires the Key Deriver,
//! Storage Provider, Chain Services, signer pipeline, Permissions Manager,
//! and per-wallet in-memory state (BEEF accumulator, pending-sign-action
//! cache) behind the wire-shaped argument/result types of [`crate::args`].
//!
//! Scoped to this workspace's own representative-methods list; this crate
//! does not implement `discover_by_identity_key`/`discover_by_attributes`
//! (see DESIGN.md).

use std::sync::{Arc, Mutex};

use wallet_toolbox_common::error::{WalletError, WalletResult};
use wallet_toolbox_common::types::{Counterparty, Protocol};
use wallet_toolbox_crypto::KeyDeriver;
use wallet_toolbox_services::ServiceProvider;
use wallet_toolbox_storage::list_outputs::{
    basket_spec_op, sum_satoshis, SPEC_OP_INVALID_CHANGE, SPEC_OP_SET_WALLET_CHANGE_PARAMS, SPEC_OP_WALLET_BALANCE,
};
use wallet_toolbox_storage::provider::{CertificateQuery, OutputQuery, TagQueryMode, TransactionQuery};
use wallet_toolbox_storage::{Output, StorageError, StorageProvider};

use crate::args::*;
use crate::config::WalletToolboxConfig;
use crate::liveness::ServicesLivenessCheck;
use crate::pending::{BeefParty, PendingSignActions};

fn storage_err(e: StorageError) -> WalletError {
    WalletError::runtime(format!("storage error: {e}"))
}

/// Validates `originator` per spec §4.1(a): at most 250 UTF-8 bytes, and
/// never the reserved admin originator when presented by an external caller.
fn check_originator(originator: Option<&str>) -> WalletResult<()> {
    wallet_toolbox_common::types::validate_originator(originator)?;
    if wallet_toolbox_common::types::is_admin_originator(originator) {
        return Err(WalletError::invalid_parameter(
            "originator",
            "the admin originator may not be presented by an external caller",
        ));
    }
    Ok(())
}

fn parse_counterparty(raw: Option<&str>) -> WalletResult<Counterparty> {
    match raw {
        Some(raw) => Counterparty::parse(raw),
        None => Ok(Counterparty::Myself),
    }
}

fn parse_tag_query_mode(raw: Option<&str>) -> TagQueryMode {
    match raw.map(str::to_ascii_lowercase).as_deref() {
        Some("all") => TagQueryMode::All,
        _ => TagQueryMode::Any,
    }
}

/// A single authenticated wallet session. One `Wallet` maps to one
/// `user_id`; a process serving multiple users holds one `Wallet` per
/// identity key.
pub struct Wallet {
    storage: Arc<dyn StorageProvider>,
    services: Arc<dyn ServiceProvider>,
    key_deriver: Arc<dyn KeyDeriver>,
    permissions: Mutex<wallet_toolbox_permissions::PermissionsManager>,
    beef: BeefParty,
    pending: PendingSignActions,
    config: WalletToolboxConfig,
    user_id: i64,
    identity_key: String,
}

impl Wallet {
    /// Opens (or creates) the wallet's User row and returns a session bound
    /// to it.
    pub async fn open(
        storage: Arc<dyn StorageProvider>,
        services: Arc<dyn ServiceProvider>,
        key_deriver: Arc<dyn KeyDeriver>,
        config: WalletToolboxConfig,
        identity_key: &str,
    ) -> WalletResult<Self> {
        let user = storage
            .find_or_insert_user(identity_key)
            .await
            .map_err(storage_err)?;
        Ok(Self {
            storage,
            services,
            key_deriver,
            permissions: Mutex::new(wallet_toolbox_permissions::PermissionsManager::new()),
            beef: BeefParty::default(),
            pending: PendingSignActions::new(config.pending_sign_action_ttl()),
            config,
            user_id: user.user_id,
            identity_key: identity_key.to_string(),
        })
    }

    pub fn identity_key(&self) -> &str {
        &self.identity_key
    }

    pub fn get_version(&self, originator: Option<&str>) -> WalletResult<String> {
        check_originator(originator)?;
        Ok(env!("CARGO_PKG_VERSION").to_string())
    }

    pub fn get_network(&self, originator: Option<&str>) -> WalletResult<crate::config::Network> {
        check_originator(originator)?;
        Ok(self.config.network)
    }

    pub fn get_public_key(&self, args: GetPublicKeyArgs, originator: Option<&str>) -> WalletResult<GetPublicKeyResult> {
        check_originator(originator)?;
        let pk = if args.identity_key {
            self.key_deriver.root_public_key()
        } else {
            let (level, name) = args
                .protocol_id
                .ok_or_else(|| WalletError::invalid_parameter("protocolID", "required unless identityKey is set"))?;
            let key_id = args
                .key_id
                .ok_or_else(|| WalletError::invalid_parameter("keyID", "required unless identityKey is set"))?;
            let protocol = Protocol::parse(level, &name)?;
            let counterparty = parse_counterparty(args.counterparty.as_deref())?;
            self.key_deriver
                .derive_public_key(&protocol, &key_id, &counterparty, args.for_self)?
        };
        Ok(GetPublicKeyResult {
            public_key: hex::encode(pk.serialize()),
        })
    }

    fn signing_hash(data: Option<&[u8]>, hash: Option<[u8; 32]>) -> WalletResult<[u8; 32]> {
        match (data, hash) {
            (Some(_), Some(_)) => Err(WalletError::invalid_parameter(
                "data/hashToDirectlySign",
                "exactly one of data or hashToDirectlySign is allowed",
            )),
            (None, None) => Err(WalletError::invalid_parameter(
                "data/hashToDirectlySign",
                "one of data or hashToDirectlySign is required",
            )),
            (Some(data), None) => Ok(wallet_toolbox_common::hash::sha256(data)),
            (None, Some(hash)) => Ok(hash),
        }
    }

    pub fn create_signature(
        &self,
        args: CreateSignatureArgs,
        originator: Option<&str>,
    ) -> WalletResult<CreateSignatureResult> {
        check_originator(originator)?;
        let hash = Self::signing_hash(args.data.as_deref(), args.hash_to_directly_sign)?;
        let protocol = Protocol::parse(args.protocol_id.0, &args.protocol_id.1)?;
        let counterparty = parse_counterparty(args.counterparty.as_deref())?;
        let signature = self
            .key_deriver
            .sign(&protocol, &args.key_id, &counterparty, &hash)?;
        Ok(CreateSignatureResult {
            signature: signature.serialize_der().to_vec(),
        })
    }

    pub fn verify_signature(
        &self,
        args: VerifySignatureArgs,
        originator: Option<&str>,
    ) -> WalletResult<VerifySignatureResult> {
        check_originator(originator)?;
        let hash = Self::signing_hash(args.data.as_deref(), args.hash_to_directly_verify)?;
        let protocol = Protocol::parse(args.protocol_id.0, &args.protocol_id.1)?;
        let counterparty = parse_counterparty(args.counterparty.as_deref())?;
        let signature = secp256k1::ecdsa::Signature::from_der(&args.signature)
            .map_err(|e| WalletError::invalid_parameter("signature", format!("not a valid DER signature: {e}")))?;
        let public_key = args
            .public_key
            .map(|pk| {
                let bytes = hex::decode(&pk)
                    .map_err(|e| WalletError::invalid_parameter("publicKey", format!("not hex: {e}")))?;
                secp256k1::PublicKey::from_slice(&bytes)
                    .map_err(|e| WalletError::invalid_parameter("publicKey", format!("not a public key: {e}")))
            })
            .transpose()?;
        let valid = self.key_deriver.verify(
            &protocol,
            &args.key_id,
            &counterparty,
            &hash,
            &signature,
            public_key.as_ref(),
        )?;
        Ok(VerifySignatureResult { valid })
    }

    pub fn encrypt(&self, args: EncryptArgs, originator: Option<&str>) -> WalletResult<EncryptResult> {
        check_originator(originator)?;
        let protocol = Protocol::parse(args.protocol_id.0, &args.protocol_id.1)?;
        let counterparty = parse_counterparty(args.counterparty.as_deref())?;
        let ciphertext = self
            .key_deriver
            .encrypt(&protocol, &args.key_id, &counterparty, &args.plaintext)?;
        Ok(EncryptResult { ciphertext })
    }

    pub fn decrypt(&self, args: DecryptArgs, originator: Option<&str>) -> WalletResult<DecryptResult> {
        check_originator(originator)?;
        let protocol = Protocol::parse(args.protocol_id.0, &args.protocol_id.1)?;
        let counterparty = parse_counterparty(args.counterparty.as_deref())?;
        let plaintext = self
            .key_deriver
            .decrypt(&protocol, &args.key_id, &counterparty, &args.ciphertext)?;
        Ok(DecryptResult { plaintext })
    }

    pub fn create_hmac(&self, args: CreateHmacArgs, originator: Option<&str>) -> WalletResult<CreateHmacResult> {
        check_originator(originator)?;
        let protocol = Protocol::parse(args.protocol_id.0, &args.protocol_id.1)?;
        let counterparty = parse_counterparty(args.counterparty.as_deref())?;
        let hmac = self
            .key_deriver
            .create_hmac(&protocol, &args.key_id, &counterparty, &args.data)?;
        Ok(CreateHmacResult { hmac })
    }

    pub fn verify_hmac(&self, args: VerifyHmacArgs, originator: Option<&str>) -> WalletResult<VerifyHmacResult> {
        check_originator(originator)?;
        let protocol = Protocol::parse(args.protocol_id.0, &args.protocol_id.1)?;
        let counterparty = parse_counterparty(args.counterparty.as_deref())?;
        let valid = self
            .key_deriver
            .verify_hmac(&protocol, &args.key_id, &counterparty, &args.data, &args.hmac)?;
        Ok(VerifyHmacResult { valid })
    }

    pub async fn create_action(
        &self,
        args: CreateActionArgs,
        originator: Option<&str>,
    ) -> WalletResult<CreateActionResult> {
        check_originator(originator)?;
        let original_args = args.clone();
        let pipeline_args = wallet_toolbox_signer::pipeline::CreateActionArgs {
            user_id: self.user_id,
            description: args.description,
            input_beef: args.input_beef,
            inputs: args
                .inputs
                .iter()
                .map(|i| wallet_toolbox_signer::pipeline::CreateActionInput {
                    outpoint: i.outpoint.clone(),
                    sequence_number: i.sequence_number,
                })
                .collect(),
            outputs: args
                .outputs
                .iter()
                .map(|o| wallet_toolbox_signer::pipeline::CreateActionOutputSpec {
                    satoshis: o.satoshis,
                    locking_script: o.locking_script.clone(),
                    output_description: o.output_description.clone(),
                    basket: o.basket.clone(),
                    change: false,
                    custom_instructions: o.custom_instructions.clone(),
                    derivation_prefix: None,
                    derivation_suffix: None,
                })
                .collect(),
            lock_time: args.lock_time,
            version: args.version,
            labels: args.labels.clone(),
            send_with: args.send_with.clone(),
            accept_delayed_broadcast: args.accept_delayed_broadcast,
            is_no_send: args.is_no_send,
        };
        let flags = wallet_toolbox_signer::pipeline::compute_action_flags(&pipeline_args);

        let result = wallet_toolbox_signer::pipeline::create_action(
            self.storage.as_ref(),
            self.key_deriver.as_ref(),
            pipeline_args,
        )
        .await?;

        let mut signable_transaction = None;
        if flags.is_new_tx {
            if let Some(tx) = &result.signable_tx {
                let transaction = self
                    .storage
                    .find_transaction_by_reference(&result.reference)
                    .await
                    .map_err(storage_err)?
                    .ok_or_else(|| WalletError::runtime("create_action: transaction vanished after insert"))?;
                signable_transaction = Some(SignableTransaction {
                    reference: result.reference.clone(),
                    tx: tx.clone(),
                });
                self.pending.insert(result.reference.clone(), original_args, transaction.transaction_id);
            }
        }

        let no_send_change = if flags.is_no_send {
            Some(result.change_vouts.iter().map(i64::to_string).collect())
        } else {
            None
        };

        Ok(CreateActionResult {
            reference: result.reference,
            txid: None,
            tx: None,
            no_send_change,
            signable_transaction,
        })
    }

    pub async fn sign_action(
        &self,
        args: SignActionArgs,
        originator: Option<&str>,
    ) -> WalletResult<SignActionResult> {
        check_originator(originator)?;
        let (pending_args, transaction_id) = self
            .pending
            .take(&args.reference)
            .ok_or_else(|| WalletError::invalid_parameter("reference", "no pending sign action for this reference"))?;

        let outcome = wallet_toolbox_signer::pipeline::sign_action(
            self.storage.as_ref(),
            self.services.as_ref(),
            transaction_id,
            args.raw_tx,
            args.accept_delayed_broadcast,
            &pending_args.send_with,
        )
        .await?;

        let stored_raw_tx = self
            .storage
            .find_transaction(transaction_id)
            .await
            .map_err(storage_err)?
            .and_then(|t| t.raw_tx);

        let tx = match &stored_raw_tx {
            Some(raw_tx) => Some(self.merge_and_build_atomic(&outcome.txid, raw_tx)?),
            None => None,
        };

        Ok(SignActionResult {
            txid: Some(outcome.txid),
            tx,
        })
    }

    pub async fn abort_action(&self, args: AbortActionArgs, originator: Option<&str>) -> WalletResult<AbortActionResult> {
        check_originator(originator)?;
        let rows = self.storage.abort_action(&args.reference).await.map_err(storage_err)?;
        Ok(AbortActionResult { aborted: rows > 0 })
    }

    pub async fn internalize_action(
        &self,
        args: InternalizeActionArgs,
        originator: Option<&str>,
    ) -> WalletResult<InternalizeActionResult> {
        check_originator(originator)?;
        let tx_bytes = args.tx.clone();
        let outputs = args
            .outputs
            .into_iter()
            .map(|o| wallet_toolbox_signer::internalize::InternalizeOutputArgs {
                output_index: o.output_index,
                payment_remittance: o.payment_remittance.map(|p| {
                    wallet_toolbox_signer::internalize::PaymentRemittance {
                        sender_identity_key: p.sender_identity_key,
                        derivation_prefix: p.derivation_prefix,
                        derivation_suffix: p.derivation_suffix,
                    }
                }),
                insertion_remittance: o.insertion_remittance.map(|i| {
                    wallet_toolbox_signer::internalize::InsertionRemittance {
                        basket: i.basket,
                        tags: i.tags,
                        custom_instructions: i.custom_instructions,
                    }
                }),
            })
            .collect();

        let outcome = wallet_toolbox_signer::internalize::internalize_action(
            self.storage.as_ref(),
            wallet_toolbox_signer::internalize::InternalizeActionArgs {
                user_id: self.user_id,
                tx: args.tx,
                outputs,
                labels: args.labels,
                description: args.description,
            },
        )
        .await?;

        if let Ok(txid) = wallet_toolbox_common::hash::Txid::from_hex(&outcome.txid) {
            let mut fragment = wallet_toolbox_common::beef::Beef::new();
            fragment.insert_raw_tx(txid, tx_bytes, None);
            self.beef.merge(&fragment);
        }

        Ok(InternalizeActionResult {
            accepted: outcome.accepted,
            is_merge: outcome.is_merge,
            txid: outcome.txid,
            satoshis: outcome.satoshis,
        })
    }

    /// Merges `raw_tx` (keyed by `txid`) into this wallet's BEEF accumulator
    /// and returns the atomic BEEF bytes for `txid`, resolving any
    /// txid-only placeholder against the same accumulator snapshot — the
    /// mechanism spec §4.1 requires behind every `tx` field a façade method
    /// returns.
    fn merge_and_build_atomic(&self, txid_hex: &str, raw_tx: &[u8]) -> WalletResult<Vec<u8>> {
        let txid = wallet_toolbox_common::hash::Txid::from_hex(txid_hex)
            .map_err(|e| WalletError::runtime(format!("malformed txid: {e}")))?;

        let mut fragment = wallet_toolbox_common::beef::Beef::new();
        fragment.insert_raw_tx(txid, raw_tx.to_vec(), None);
        self.beef.merge(&fragment);

        let snapshot = self.beef.snapshot();
        let known_txids = std::collections::HashSet::new();
        let mut atomic = snapshot.build_atomic(txid, &known_txids).map_err(|e| {
            WalletError::runtime(format!("failed to build atomic BEEF for {txid_hex}: {e}"))
        })?;
        atomic.resolve_against(&snapshot, &known_txids).map_err(|e| {
            WalletError::runtime(format!("failed to resolve atomic BEEF for {txid_hex}: {e}"))
        })?;
        serde_json::to_vec(&atomic).map_err(|e| WalletError::runtime(format!("failed to encode atomic BEEF: {e}")))
    }

    async fn output_to_wire(&self, output: Output, args: &ListOutputsArgs) -> WalletResult<ListOutputsOutput> {
        let outpoint = match &output.txid {
            Some(txid) => format!("{txid}.{}", output.vout),
            None => format!("pending.{}", output.vout),
        };
        let tags = if args.include_tags {
            Some(self.storage.tags_for_output(output.output_id).await.map_err(storage_err)?)
        } else {
            None
        };
        Ok(ListOutputsOutput {
            outpoint,
            satoshis: output.satoshis,
            locking_script: if args.include_locking_scripts { output.locking_script } else { None },
            spendable: output.spendable,
            tags,
            custom_instructions: if args.include_custom_instructions {
                output.custom_instructions
            } else {
                None
            },
        })
    }

    /// `list_outputs`: recognizes the `wallet-balance`,
    /// `invalid-change`, and `set-wallet-change-params` basket SpecOps
    /// before falling back to ordinary basket/tag filtering.
    pub async fn list_outputs(
        &self,
        args: ListOutputsArgs,
        originator: Option<&str>,
    ) -> WalletResult<ListOutputsResult> {
        check_originator(originator)?;
        let spec_op = basket_spec_op(args.basket.as_deref());

        if spec_op == Some(SPEC_OP_SET_WALLET_CHANGE_PARAMS) {
            let number_of_desired_utxos: i64 = args
                .tags
                .first()
                .ok_or_else(|| WalletError::invalid_parameter("tags[0]", "numberOfDesiredUTXOs is required"))?
                .parse()
                .map_err(|_| WalletError::invalid_parameter("tags[0]", "numberOfDesiredUTXOs must be an integer"))?;
            let minimum_desired_utxo_value: i64 = args
                .tags
                .get(1)
                .ok_or_else(|| WalletError::invalid_parameter("tags[1]", "minimumDesiredUTXOValue is required"))?
                .parse()
                .map_err(|_| WalletError::invalid_parameter("tags[1]", "minimumDesiredUTXOValue must be an integer"))?;
            self.storage
                .set_wallet_change_params(self.user_id, number_of_desired_utxos, minimum_desired_utxo_value)
                .await
                .map_err(storage_err)?;
            return Ok(ListOutputsResult {
                total_outputs: 0,
                outputs: Vec::new(),
            });
        }

        let query = OutputQuery {
            user_id: self.user_id,
            basket: args.basket.clone(),
            tags: args.tags.clone(),
            tag_query_mode: Some(parse_tag_query_mode(args.tag_query_mode.as_deref())),
            meta_selector: None,
            limit: args.limit,
            offset: args.offset,
            include_spent: if spec_op == Some(SPEC_OP_INVALID_CHANGE) {
                false
            } else {
                args.include_spent
            },
        };
        let (rows, total) = self.storage.find_outputs_raw(query).await.map_err(storage_err)?;

        if spec_op == Some(SPEC_OP_WALLET_BALANCE) {
            return Ok(ListOutputsResult {
                total_outputs: sum_satoshis(&rows),
                outputs: Vec::new(),
            });
        }

        if spec_op == Some(SPEC_OP_INVALID_CHANGE) {
            let liveness = ServicesLivenessCheck::new(self.services.clone());
            let release = args.tags.iter().any(|t| t == "release");
            let mut not_utxos = Vec::new();
            for output in rows {
                let is_utxo = wallet_toolbox_storage::services::UtxoLivenessCheck::is_utxo(&liveness, &output)
                    .await
                    .map_err(storage_err)?;
                if !is_utxo {
                    if release {
                        self.storage
                            .update_output_spendable(output.output_id, false)
                            .await
                            .map_err(storage_err)?;
                    }
                    not_utxos.push(output);
                }
            }
            let total = not_utxos.len() as i64;
            let mut outputs = Vec::with_capacity(not_utxos.len());
            for output in not_utxos {
                outputs.push(self.output_to_wire(output, &args).await?);
            }
            return Ok(ListOutputsResult { total_outputs: total, outputs });
        }

        let mut outputs = Vec::with_capacity(rows.len());
        for output in rows {
            outputs.push(self.output_to_wire(output, &args).await?);
        }
        Ok(ListOutputsResult { total_outputs: total, outputs })
    }

    /// `balance()`: the `wallet-balance` SpecOp, materializing nothing.
    pub async fn balance(&self, originator: Option<&str>) -> WalletResult<BalanceResult> {
        let result = self
            .list_outputs(
                ListOutputsArgs {
                    basket: Some(SPEC_OP_WALLET_BALANCE.to_string()),
                    ..Default::default()
                },
                originator,
            )
            .await?;
        Ok(BalanceResult { total: result.total_outputs })
    }

    /// `balance_and_utxos(basket)`: paginates `list_outputs` at chunk 1000,
    /// summing satoshis and collecting `{satoshis, outpoint}` along the way.
    pub async fn balance_and_utxos(
        &self,
        basket: Option<String>,
        originator: Option<&str>,
    ) -> WalletResult<BalanceAndUtxosResult> {
        const CHUNK: i64 = 1000;
        let basket = basket.unwrap_or_else(|| "default".to_string());
        let mut total = 0i64;
        let mut utxos = Vec::new();
        let mut offset = 0i64;

        loop {
            let page = self
                .list_outputs(
                    ListOutputsArgs {
                        basket: Some(basket.clone()),
                        limit: Some(CHUNK),
                        offset: Some(offset),
                        ..Default::default()
                    },
                    originator,
                )
                .await?;
            if page.outputs.is_empty() {
                break;
            }
            offset += page.outputs.len() as i64;
            for output in page.outputs {
                total += output.satoshis;
                utxos.push(Utxo { satoshis: output.satoshis, outpoint: output.outpoint });
            }
        }

        Ok(BalanceAndUtxosResult { total, utxos })
    }

    /// `review_spendable_outputs(args)`: the `invalid-change` SpecOp,
    /// surfacing candidates that Services no longer considers live UTXOs and,
    /// when `args.release`, flipping them unspendable.
    pub async fn review_spendable_outputs(
        &self,
        args: ReviewSpendableOutputsArgs,
        originator: Option<&str>,
    ) -> WalletResult<ListOutputsResult> {
        let mut tags = Vec::new();
        if args.all {
            tags.push("all".to_string());
        }
        if args.release {
            tags.push("release".to_string());
        }
        self.list_outputs(
            ListOutputsArgs {
                basket: Some(SPEC_OP_INVALID_CHANGE.to_string()),
                tags,
                include_locking_scripts: true,
                ..Default::default()
            },
            originator,
        )
        .await
    }

    pub async fn list_actions(
        &self,
        args: ListActionsArgs,
        originator: Option<&str>,
    ) -> WalletResult<ListActionsResult> {
        check_originator(originator)?;
        let query = TransactionQuery {
            user_id: self.user_id,
            labels: args.labels,
            label_query_mode: parse_tag_query_mode(args.label_query_mode.as_deref()),
            reference: args.reference,
            limit: args.limit,
            offset: args.offset,
        };
        let (rows, total) = wallet_toolbox_storage::actions::list_actions(self.storage.as_ref(), query)
            .await
            .map_err(storage_err)?;
        let actions = rows
            .into_iter()
            .map(|row| ListActionsAction {
                reference: row.transaction.reference,
                txid: row.transaction.txid,
                satoshis: row.transaction.satoshis,
                status: row.transaction.status,
                description: row.transaction.description,
                labels: row.labels,
            })
            .collect();
        Ok(ListActionsResult { total_actions: total, actions })
    }

    pub async fn relinquish_output(
        &self,
        args: RelinquishOutputArgs,
        originator: Option<&str>,
    ) -> WalletResult<()> {
        check_originator(originator)?;
        wallet_toolbox_storage::actions::relinquish_output(self.storage.as_ref(), args.output_id)
            .await
            .map_err(storage_err)
    }

    pub async fn relinquish_certificate(
        &self,
        args: RelinquishCertificateArgs,
        originator: Option<&str>,
    ) -> WalletResult<()> {
        check_originator(originator)?;
        wallet_toolbox_storage::certificates::relinquish_certificate(self.storage.as_ref(), args.certificate_id)
            .await
            .map_err(storage_err)
    }

    pub async fn list_certificates(
        &self,
        args: ListCertificatesArgs,
        originator: Option<&str>,
    ) -> WalletResult<ListCertificatesResult> {
        check_originator(originator)?;
        let query = CertificateQuery {
            user_id: self.user_id,
            r#type: args.r#type,
            certifiers: args.certifiers,
            subject: args.subject,
            limit: args.limit,
            offset: args.offset,
        };
        let (rows, total) = wallet_toolbox_storage::certificates::list_certificates(self.storage.as_ref(), query)
            .await
            .map_err(storage_err)?;
        let certificates = rows
            .into_iter()
            .map(|row| CertificateOut {
                certificate_id: row.certificate.certificate_id,
                r#type: row.certificate.r#type,
                serial_number: row.certificate.serial_number,
                certifier: row.certificate.certifier,
                subject: row.certificate.subject,
                fields: row.fields.into_iter().map(|f| f.field_name).collect(),
            })
            .collect();
        Ok(ListCertificatesResult { total_certificates: total, certificates })
    }

    pub async fn acquire_certificate(
        &self,
        args: AcquireCertificateArgs,
        originator: Option<&str>,
    ) -> WalletResult<CertificateOut> {
        check_originator(originator)?;
        let fields = args
            .fields
            .into_iter()
            .map(|f| wallet_toolbox_signer::certificates::NewCertificateField {
                name: f.name,
                value: f.value,
            })
            .collect();
        let cert = wallet_toolbox_signer::certificates::acquire_direct_certificate(
            self.storage.as_ref(),
            self.key_deriver.as_ref(),
            wallet_toolbox_signer::certificates::AcquireDirectCertificateArgs {
                user_id: self.user_id,
                r#type: args.r#type,
                serial_number: args.serial_number,
                certifier: args.certifier,
                subject: args.subject,
                verifier: args.verifier,
                revocation_outpoint: args.revocation_outpoint,
                fields,
            },
        )
        .await?;
        Ok(CertificateOut {
            certificate_id: cert.certificate.certificate_id,
            r#type: cert.certificate.r#type,
            serial_number: cert.certificate.serial_number,
            certifier: cert.certificate.certifier,
            subject: cert.certificate.subject,
            fields: cert.fields.into_iter().map(|f| f.field_name).collect(),
        })
    }

    pub async fn prove_certificate(
        &self,
        args: ProveCertificateArgs,
        originator: Option<&str>,
    ) -> WalletResult<ProveCertificateResult> {
        check_originator(originator)?;
        let verifier = Counterparty::parse(&args.verifier)?;
        let revealed = wallet_toolbox_signer::certificates::prove_certificate(
            self.storage.as_ref(),
            self.key_deriver.as_ref(),
            args.certificate_id,
            &args.fields_to_reveal,
            &verifier,
        )
        .await?;
        Ok(ProveCertificateResult {
            keyring_for_verifier: revealed
                .into_iter()
                .map(|f| (f.name, f.encrypted_master_key))
                .collect(),
        })
    }

    /// Merges an externally-observed BEEF fragment into this wallet's
    /// accumulator, e.g. one received alongside an `internalize_action` call
    ///.
    pub fn merge_beef(&self, beef: &wallet_toolbox_common::beef::Beef) {
        self.beef.merge(beef)
    }

    pub fn beef_snapshot(&self) -> wallet_toolbox_common::beef::Beef {
        self.beef.snapshot()
    }

    pub fn permissions(&self) -> &Mutex<wallet_toolbox_permissions::PermissionsManager> {
        &self.permissions
    }

    /// Opportunistic TTL sweep over the pending-sign-action cache; callers
    /// may invoke this alongside the Monitor's own tick rather than run a
    /// dedicated timer for it.
    pub fn evict_expired_pending_actions(&self) {
        self.pending.evict_expired()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use wallet_toolbox_crypto::Secp256k1KeyDeriver;
    use wallet_toolbox_services::{
        BlockHeaderInfo, MerkleProofResponse, PostBeefResult, ScriptHistoryEntry, TransactionStatusResponse,
        UtxoStatusRequest, UtxoStatusResponse,
    };
    use wallet_toolbox_storage::provider::SqliteStorageProvider;

    use super::*;

    /// A services stub for façade tests that never reach the network:
    /// every method `unimplemented!()`s, the same shape as the multiplexer's
    /// own `FlakyProvider` test double.
    struct DummyServices;

    #[async_trait]
    impl ServiceProvider for DummyServices {
        fn name(&self) -> &'static str {
            "dummy"
        }
        async fn get_height(&self) -> WalletResult<u32> {
            unimplemented!()
        }
        async fn get_header_for_height(&self, _height: u32) -> WalletResult<[u8; 80]> {
            unimplemented!()
        }
        async fn find_header_for_height(&self, _height: u32) -> WalletResult<Option<BlockHeaderInfo>> {
            unimplemented!()
        }
        async fn find_chain_tip_header(&self) -> WalletResult<BlockHeaderInfo> {
            unimplemented!()
        }
        async fn find_chain_tip_hash(&self) -> WalletResult<String> {
            unimplemented!()
        }
        async fn find_header_for_block_hash(&self, _hash: &str) -> WalletResult<Option<BlockHeaderInfo>> {
            unimplemented!()
        }
        async fn get_raw_tx(&self, _txid: &str) -> WalletResult<Option<String>> {
            unimplemented!()
        }
        async fn get_merkle_path_for_transaction(&self, _txid: &str) -> WalletResult<Option<MerkleProofResponse>> {
            unimplemented!()
        }
        async fn is_valid_root_for_height(&self, _root: &str, _height: u32) -> WalletResult<bool> {
            unimplemented!()
        }
        async fn get_utxo_status(&self, _request: UtxoStatusRequest) -> WalletResult<UtxoStatusResponse> {
            unimplemented!()
        }
        async fn get_script_history(&self, _script_hash: &str) -> WalletResult<Vec<ScriptHistoryEntry>> {
            unimplemented!()
        }
        async fn get_transaction_status(&self, _txid: &str) -> WalletResult<TransactionStatusResponse> {
            unimplemented!()
        }
        async fn get_tx_propagation(&self, _txid: &str) -> WalletResult<u32> {
            unimplemented!()
        }
        async fn post_beef(&self, _beef: &[u8], _txids: &[String]) -> WalletResult<PostBeefResult> {
            unimplemented!()
        }
        async fn post_beef_array(&self, _beefs: &[Vec<u8>]) -> WalletResult<Vec<PostBeefResult>> {
            unimplemented!()
        }
        async fn update_bsv_exchange_rate(&self) -> WalletResult<f64> {
            unimplemented!()
        }
        async fn get_fiat_exchange_rate(&self, _currency: &str, _base: &str) -> WalletResult<f64> {
            unimplemented!()
        }
    }

    fn root_secret_key(identity_key: &str) -> secp256k1::SecretKey {
        let digest = wallet_toolbox_common::hash::sha256(identity_key.as_bytes());
        secp256k1::SecretKey::from_slice(&digest).unwrap()
    }

    async fn open_wallet(identity_key: &str) -> Wallet {
        let storage: Arc<dyn StorageProvider> = Arc::new(SqliteStorageProvider::connect(":memory:").await.unwrap());
        let services: Arc<dyn ServiceProvider> = Arc::new(DummyServices);
        let key_deriver: Arc<dyn KeyDeriver> = Arc::new(Secp256k1KeyDeriver::new(root_secret_key(identity_key)));
        Wallet::open(storage, services, key_deriver, WalletToolboxConfig::default(), identity_key)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn open_is_idempotent_on_identity_key() {
        let storage = Arc::new(SqliteStorageProvider::connect(":memory:").await.unwrap());
        let services: Arc<dyn ServiceProvider> = Arc::new(DummyServices);
        let identity_key = "02aabb";
        let key_deriver: Arc<dyn KeyDeriver> = Arc::new(Secp256k1KeyDeriver::new(root_secret_key(identity_key)));

        let first = Wallet::open(
            storage.clone(),
            services.clone(),
            key_deriver.clone(),
            WalletToolboxConfig::default(),
            identity_key,
        )
        .await
        .unwrap();
        let second = Wallet::open(storage, services, key_deriver, WalletToolboxConfig::default(), identity_key)
            .await
            .unwrap();

        assert_eq!(first.user_id, second.user_id);
        assert_eq!(first.identity_key(), identity_key);
    }

    #[tokio::test]
    async fn get_public_key_with_identity_key_returns_the_root_public_key() {
        let identity_key = "02aabb";
        let wallet = open_wallet(identity_key).await;

        let result = wallet
            .get_public_key(
                GetPublicKeyArgs {
                    identity_key: true,
                    protocol_id: None,
                    key_id: None,
                    counterparty: None,
                    for_self: false,
                    privileged: false,
                },
                None,
            )
            .unwrap();

        let expected = wallet_toolbox_crypto::Secp256k1KeyDeriver::new(root_secret_key(identity_key)).root_public_key();
        assert_eq!(result.public_key, hex::encode(expected.serialize()));
    }

    #[tokio::test]
    async fn get_public_key_requires_protocol_id_without_identity_key() {
        let wallet = open_wallet("02aabb").await;

        let err = wallet
            .get_public_key(
                GetPublicKeyArgs {
                    identity_key: false,
                    protocol_id: None,
                    key_id: None,
                    counterparty: None,
                    for_self: false,
                    privileged: false,
                },
                None,
            )
            .unwrap_err();

        assert!(format!("{err}").contains("protocolID"));
    }

    #[tokio::test]
    async fn list_outputs_wallet_balance_sums_regardless_of_limit() {
        let wallet = open_wallet("02aabb").await;

        for satoshis in [100, 200, 700] {
            wallet
                .create_action(
                    CreateActionArgs {
                        description: "seed".into(),
                        inputs: Vec::new(),
                        outputs: vec![CreateActionOutputArg {
                            satoshis,
                            locking_script: vec![0x76, 0xa9],
                            output_description: None,
                            basket: Some("default".into()),
                            custom_instructions: None,
                        }],
                        lock_time: None,
                        version: None,
                        labels: Vec::new(),
                        input_beef: None,
                        send_with: Vec::new(),
                        accept_delayed_broadcast: true,
                        is_no_send: true,
                    },
                    None,
                )
                .await
                .unwrap();
        }

        let result = wallet
            .list_outputs(
                ListOutputsArgs {
                    basket: Some("wallet-balance".into()),
                    limit: Some(1),
                    ..Default::default()
                },
                None,
            )
            .await
            .unwrap();

        assert_eq!(result.total_outputs, 1000);
        assert!(result.outputs.is_empty());
    }

    #[tokio::test]
    async fn balance_matches_the_wallet_balance_spec_op() {
        let wallet = open_wallet("02aabb").await;

        for satoshis in [100, 250] {
            wallet
                .create_action(
                    CreateActionArgs {
                        description: "seed".into(),
                        inputs: Vec::new(),
                        outputs: vec![CreateActionOutputArg {
                            satoshis,
                            locking_script: vec![0x76, 0xa9],
                            output_description: None,
                            basket: Some("default".into()),
                            custom_instructions: None,
                        }],
                        lock_time: None,
                        version: None,
                        labels: Vec::new(),
                        input_beef: None,
                        send_with: Vec::new(),
                        accept_delayed_broadcast: true,
                        is_no_send: true,
                    },
                    None,
                )
                .await
                .unwrap();
        }

        let result = wallet.balance(None).await.unwrap();
        assert_eq!(result.total, 350);
    }

    #[tokio::test]
    async fn balance_and_utxos_paginates_and_sums_the_default_basket() {
        let wallet = open_wallet("02aabb").await;

        for satoshis in [100, 200, 700] {
            wallet
                .create_action(
                    CreateActionArgs {
                        description: "seed".into(),
                        inputs: Vec::new(),
                        outputs: vec![CreateActionOutputArg {
                            satoshis,
                            locking_script: vec![0x76, 0xa9],
                            output_description: None,
                            basket: Some("default".into()),
                            custom_instructions: None,
                        }],
                        lock_time: None,
                        version: None,
                        labels: Vec::new(),
                        input_beef: None,
                        send_with: Vec::new(),
                        accept_delayed_broadcast: true,
                        is_no_send: true,
                    },
                    None,
                )
                .await
                .unwrap();
        }

        let result = wallet.balance_and_utxos(None, None).await.unwrap();
        assert_eq!(result.total, 1000);
        assert_eq!(result.utxos.len(), 3);
        assert!(result.utxos.iter().all(|u| !u.outpoint.is_empty()));
    }

    #[tokio::test]
    async fn review_spendable_outputs_uses_the_invalid_change_spec_op_and_ignores_include_spent() {
        let wallet = open_wallet("02aabb").await;

        wallet
            .create_action(
                CreateActionArgs {
                    description: "seed".into(),
                    inputs: Vec::new(),
                    outputs: vec![CreateActionOutputArg {
                        satoshis: 500,
                        locking_script: vec![0x76, 0xa9],
                        output_description: None,
                        basket: Some("default".into()),
                        custom_instructions: None,
                    }],
                    lock_time: None,
                    version: None,
                    labels: Vec::new(),
                    input_beef: None,
                    send_with: Vec::new(),
                    accept_delayed_broadcast: true,
                    is_no_send: true,
                },
                None,
            )
            .await
            .unwrap();

        let result = wallet
            .review_spendable_outputs(ReviewSpendableOutputsArgs { all: true, release: false }, None)
            .await
            .unwrap();

        assert_eq!(result.total_outputs, 1);
    }

    #[tokio::test]
    async fn list_actions_round_trips_through_the_facade() {
        let wallet = open_wallet("02aabb").await;

        wallet
            .create_action(
                CreateActionArgs {
                    description: "pay alice".into(),
                    inputs: Vec::new(),
                    outputs: vec![CreateActionOutputArg {
                        satoshis: 500,
                        locking_script: vec![0x76, 0xa9],
                        output_description: None,
                        basket: Some("default".into()),
                        custom_instructions: None,
                    }],
                    lock_time: None,
                    version: None,
                    labels: vec!["invoice".into()],
                    input_beef: None,
                    send_with: Vec::new(),
                    accept_delayed_broadcast: true,
                    is_no_send: true,
                },
                None,
            )
            .await
            .unwrap();

        let result = wallet
            .list_actions(ListActionsArgs::default(), None)
            .await
            .unwrap();

        assert_eq!(result.total_actions, 1);
        assert_eq!(result.actions.len(), 1);
        assert_eq!(result.actions[0].labels, vec!["invoice".to_string()]);
        assert_eq!(result.actions[0].satoshis, 500);
    }

    #[tokio::test]
    async fn get_version_and_network_reflect_crate_and_config_defaults() {
        let wallet = open_wallet("02aabb").await;
        assert_eq!(wallet.get_version(None).unwrap(), env!("CARGO_PKG_VERSION"));
        assert_eq!(wallet.get_network(None).unwrap(), crate::config::Network::Testnet);
    }

    #[tokio::test]
    async fn external_callers_may_not_present_the_admin_originator() {
        let wallet = open_wallet("02aabb").await;
        let err = wallet
            .get_version(Some(wallet_toolbox_common::types::ADMIN_ORIGINATOR))
            .unwrap_err();
        assert!(format!("{err}").contains("originator"));
    }
}
