//! Sessions backed by the SQLite store: durable audit trail and profile
//! restore across contexts.

mod common;

use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::SqlitePoolOptions;

use parking_lot::Mutex;

use cardamom_branch::infrastructure::Settings;
use cardamom_branch::service::{BranchContext, PlatformPorts};
use cardamom_branch::storage::SqliteContextStore;

use common::{b, location, MemoryCollections, MemoryDirectory};

async fn sqlite_store() -> anyhow::Result<Arc<SqliteContextStore>> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    let store = SqliteContextStore::new(pool);
    store.migrate().await?;
    Ok(Arc::new(store))
}

fn context_over(store: &Arc<SqliteContextStore>) -> BranchContext {
    let ports = PlatformPorts {
        directory: Arc::new(MemoryDirectory {
            locations: Mutex::new(vec![location("b1", true), location("b2", false)]),
        }),
        profiles: store.clone(),
        collections: Arc::new(MemoryCollections::default()),
        audit: store.clone(),
    };
    BranchContext::new(
        common::tenant(),
        common::user(),
        "integration-tests".to_string(),
        ports,
        &Settings::default(),
    )
}

#[tokio::test]
async fn switches_leave_a_durable_audit_trail() -> anyhow::Result<()> {
    let store = sqlite_store().await?;
    let ctx = context_over(&store);

    ctx.load_catalog().await?;
    ctx.switch_branch(&b("b2")).await?;

    // Durable writes are background tasks with retries; poll until they land.
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let entries = store.audit_entries(ctx.session_id()).await.unwrap();
            if entries.len() == 2 {
                break entries;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .map(|entries| {
        assert_eq!(entries[0].to_branch_id.as_str(), "b1");
        assert!(entries[0].from_branch_id.is_none());
        assert_eq!(entries[1].from_branch_id.as_ref().unwrap().as_str(), "b1");
        assert_eq!(entries[1].to_branch_id.as_str(), "b2");
        assert!(entries.iter().all(|e| e.client_context == "integration-tests"));
    })?;
    Ok(())
}

#[tokio::test]
async fn the_selected_branch_is_restored_in_a_new_session() -> anyhow::Result<()> {
    let store = sqlite_store().await?;

    let first = context_over(&store);
    first.load_catalog().await?;
    first.switch_branch(&b("b2")).await?;

    // Wait for the best-effort profile write to land.
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            use cardamom_branch::ports::ProfileStore;
            if let Some(selected) = store.selected_branch(&common::user()).await.unwrap() {
                if selected.as_str() == "b2" {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;

    let second = context_over(&store);
    second.load_catalog().await?;

    assert_eq!(second.active_branch().unwrap().id.as_str(), "b2");
    assert_ne!(second.session_id(), first.session_id());
    Ok(())
}
