//! Transaction-level signature checks, layered over the crypto-agile
//! `SignatureProvider` interface `xmbl-pqc` exports. Nothing in this module
//! knows which PQC scheme is in play — that is exactly the point of
//! keeping the primitive behind a trait.

use crate::error::{XmblError, XmblResult};
use crate::types::Transaction;
use std::sync::Arc;
use xmbl_pqc::SignatureProvider;

/// Verifies that `tx` carries a signature over its own canonical bytes,
/// produced by the holder of `public_key`, and that `public_key` derives
/// `tx`'s `from` address. Both checks must pass — spec.md §3 requires the
/// signer to be the address that authorized the transaction.
pub async fn verify_transaction(
    provider: &Arc<dyn SignatureProvider>,
    tx: &Transaction,
    public_key: &[u8],
) -> XmblResult<()> {
    let sig = tx
        .sig()
        .ok_or_else(|| XmblError::AuthError("transaction is unsigned".into()))?;

    let derived = provider.derive_address(public_key);
    if &derived != tx.from() {
        return Err(XmblError::AuthError(format!(
            "public key derives {derived}, transaction is from {}",
            tx.from()
        )));
    }

    let message = tx.canonical_bytes();
    let ok = provider
        .verify(&message, sig, public_key)
        .await
        .map_err(|e| XmblError::AuthError(e.to_string()))?;

    if !ok {
        return Err(XmblError::AuthError("signature does not verify".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Output, TxBody};
    use xmbl_pqc::DilithiumProvider;

    fn body(from: String) -> TxBody {
        TxBody {
            from,
            to: "xmb_recipient".into(),
            amount: 5,
            fee: 1,
            stake: 0,
            timestamp: 1,
            inputs: vec![],
            outputs: vec![Output {
                address: "xmb_recipient".into(),
                amount: 5,
            }],
            payload: None,
            sig: None,
        }
    }

    #[tokio::test]
    async fn accepts_a_correctly_signed_transaction() {
        let provider: Arc<dyn SignatureProvider> = Arc::new(DilithiumProvider::default());
        let kp = provider.keygen().await.unwrap();
        let address = provider.derive_address(&kp.public_key);

        let unsigned = Transaction::Utxo(body(address));
        let sig = provider.sign(&unsigned.canonical_bytes(), &kp.secret_key).await.unwrap();
        let signed = unsigned.with_sig(sig);

        assert!(verify_transaction(&provider, &signed, &kp.public_key).await.is_ok());
    }

    #[tokio::test]
    async fn rejects_a_signature_from_a_different_key() {
        let provider: Arc<dyn SignatureProvider> = Arc::new(DilithiumProvider::default());
        let kp = provider.keygen().await.unwrap();
        let other_kp = provider.keygen().await.unwrap();
        let address = provider.derive_address(&kp.public_key);

        let unsigned = Transaction::Utxo(body(address));
        let sig = provider
            .sign(&unsigned.canonical_bytes(), &other_kp.secret_key)
            .await
            .unwrap();
        let signed = unsigned.with_sig(sig);

        let result = verify_transaction(&provider, &signed, &kp.public_key).await;
        assert!(matches!(result, Err(XmblError::AuthError(_))));
    }

    #[tokio::test]
    async fn rejects_an_unsigned_transaction() {
        let provider: Arc<dyn SignatureProvider> = Arc::new(DilithiumProvider::default());
        let kp = provider.keygen().await.unwrap();
        let address = provider.derive_address(&kp.public_key);
        let unsigned = Transaction::Utxo(body(address));

        let result = verify_transaction(&provider, &unsigned, &kp.public_key).await;
        assert!(matches!(result, Err(XmblError::AuthError(_))));
    }
}
