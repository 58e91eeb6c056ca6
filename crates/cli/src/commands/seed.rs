//! Seed the database with the sample product catalogue.
//!
//! Products are created through the product service, so seeding leaves the
//! same audit trail as an API call. Products whose id already exists are
//! left untouched, which makes the command safe to re-run.

use rust_decimal::Decimal;

use estoque_core::ProductId;
use estoque_server::config::ServerConfig;
use estoque_server::db;
use estoque_server::services::{AuditContext, InventoryError};
use estoque_server::services::inventory::CreateProductRequest;
use estoque_server::state::AppState;

/// `(id, name, unit, quantity)` of each sample product.
const SAMPLE_PRODUCTS: &[(&str, &str, &str, i64)] = &[
    ("1", "Alade", "L", 210),
    ("2", "Curbix", "L", 71),
    ("3", "Magnum", "kg", 110),
    ("4", "Instivo", "L", 3),
    ("5", "Kasumin", "L", 50),
    ("6", "Priori", "L", 33),
];

fn sample_requests() -> impl Iterator<Item = CreateProductRequest> {
    SAMPLE_PRODUCTS
        .iter()
        .map(|&(id, name, unit, quantity)| CreateProductRequest {
            id: Some(id.to_owned()),
            name: name.to_owned(),
            unit: unit.to_owned(),
            quantity: Some(Decimal::from(quantity)),
        })
}

/// Create every sample product that does not exist yet.
///
/// # Errors
///
/// Returns an error if configuration is missing or a database call fails.
pub async fn sample_products() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::from_env()?;

    tracing::info!("Connecting to database...");
    let pool = db::create_pool(&config.database_url).await?;
    let state = AppState::new(&config, &pool);
    let products = state.products();

    let mut created = 0_usize;
    for request in sample_requests() {
        let id = ProductId::new(request.id.clone().unwrap_or_default());
        match products.get(&id).await {
            Ok(_) => {
                tracing::info!(product_id = %id, "Product exists, skipping");
                continue;
            }
            Err(InventoryError::ProductNotFound) => {}
            Err(e) => return Err(e.into()),
        }

        let product = products.create(request, AuditContext::default()).await?;
        tracing::info!(product_id = %product.id, name = %product.name, "Product seeded");
        created += 1;
    }

    tracing::info!(created, "Seeding complete");
    Ok(())
}
