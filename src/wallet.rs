use error_stack::{Report, ResultExt};

use crate::error::WalletError;
use crate::model::Balance;
use crate::storage::{PipelineStore, WalletStore};

/// Value an owned address with the most recent quote for its asset.
pub async fn balance<S>(
    store: &S,
    owner_id: i64,
    address_id: i64,
) -> Result<Balance, Report<WalletError>>
where
    S: PipelineStore + WalletStore + ?Sized,
{
    let address = store
        .get_address(owner_id, address_id)
        .await
        .change_context(WalletError::Storage)?
        .ok_or_else(|| {
            Report::new(WalletError::AddressNotFound)
                .attach(format!("address_id: {address_id}, owner_id: {owner_id}"))
        })?;

    let quote = store
        .latest_quote(address.asset)
        .await
        .change_context(WalletError::Storage)?
        .ok_or_else(|| {
            Report::new(WalletError::PriceUnavailable {
                asset: address.asset,
            })
        })?;

    Ok(Balance {
        address: address.address,
        asset: address.asset,
        balance_crypto: address.balance,
        balance_usd: address.balance * quote.price_usd,
        balance_brl: address.balance * quote.price_brl,
        priced_at: quote.observed_at,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::model::{Asset, PriceQuote};
    use crate::storage::sqlite::SqliteStorage;

    #[tokio::test]
    async fn balance_uses_latest_quote() {
        let storage = SqliteStorage::in_memory().await;
        let user = storage.create_user("Hal", "hal@example.com", "hash").await.unwrap();
        let address = storage
            .create_address(user.id, Asset::Btc, "bc1qhal")
            .await
            .unwrap();
        storage
            .add_transaction(user.id, address.id, "h-1", 2.0)
            .await
            .unwrap();

        let now = Utc::now();
        for (usd, at) in [(10.0, now - Duration::minutes(5)), (20.0, now)] {
            storage
                .append_quotes(&[PriceQuote {
                    asset: Asset::Btc,
                    price_usd: usd,
                    price_brl: usd * 5.0,
                    observed_at: at,
                }])
                .await
                .unwrap();
        }

        let balance = balance(&storage, user.id, address.id).await.unwrap();
        assert_eq!(balance.balance_crypto, 2.0);
        assert_eq!(balance.balance_usd, 40.0);
        assert_eq!(balance.balance_brl, 200.0);
        assert_eq!(balance.priced_at, now);
    }

    #[tokio::test]
    async fn missing_price_is_reported() {
        let storage = SqliteStorage::in_memory().await;
        let user = storage.create_user("Ivy", "ivy@example.com", "hash").await.unwrap();
        let address = storage
            .create_address(user.id, Asset::Eth, "0xivy")
            .await
            .unwrap();

        let err = balance(&storage, user.id, address.id).await.unwrap_err();
        assert!(matches!(
            err.current_context(),
            WalletError::PriceUnavailable { asset: Asset::Eth }
        ));
    }

    #[tokio::test]
    async fn foreign_address_is_not_found() {
        let storage = SqliteStorage::in_memory().await;
        let owner = storage.create_user("Jo", "jo@example.com", "hash").await.unwrap();
        let other = storage.create_user("Kim", "kim@example.com", "hash").await.unwrap();
        let address = storage
            .create_address(owner.id, Asset::Eth, "0xjo")
            .await
            .unwrap();

        let err = balance(&storage, other.id, address.id).await.unwrap_err();
        assert!(matches!(
            err.current_context(),
            WalletError::AddressNotFound
        ));
    }
}
