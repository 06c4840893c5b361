#![allow(dead_code)]

use chrono::Utc;
use printshop_api::{
    config::AppConfig,
    entities::{
        pricing_rule, product, product_variant, PricingRuleModel, ProductModel,
        ProductVariantModel,
    },
    events,
    providers::Providers,
    AppServices,
};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ConnectOptions, ConnectionTrait, Database, DatabaseBackend as DbBackend,
    DatabaseConnection, Set, Statement,
};
use std::sync::Arc;
use uuid::Uuid;

/// In-process application over an in-memory database and mock providers.
pub struct TestApp {
    pub db: Arc<DatabaseConnection>,
    pub services: AppServices,
    pub providers: Providers,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with_providers(Providers::mock()).await
    }

    pub async fn spawn_with_providers(providers: Providers) -> Self {
        // A pool of one: every pooled connection to :memory: would
        // otherwise be its own empty database.
        let mut opts = ConnectOptions::new("sqlite::memory:".to_owned());
        opts.max_connections(1).min_connections(1);
        let db = Arc::new(
            Database::connect(opts)
                .await
                .expect("connect in-memory database"),
        );
        create_schema(&db).await;

        let config = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            0,
            "test".to_string(),
        );

        let (event_sender, event_receiver) = events::channel(64);
        tokio::spawn(events::process_events(event_receiver));

        let services = AppServices::build(db.clone(), &config, providers.clone(), event_sender);

        Self {
            db,
            services,
            providers,
        }
    }

    pub async fn seed_product(&self, store_id: Uuid, base_price: Decimal) -> ProductModel {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            store_id: Set(store_id),
            name: Set("Classic Tee".to_string()),
            description: Set(None),
            base_price: Set(Some(base_price)),
            active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("seed product")
    }

    pub async fn seed_variant(
        &self,
        product_id: Uuid,
        sku: &str,
        supplier_cost: Option<Decimal>,
    ) -> ProductVariantModel {
        let now = Utc::now();
        product_variant::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(product_id),
            sku: Set(sku.to_string()),
            size: Set(Some("L".to_string())),
            color: Set(Some("black".to_string())),
            supplier_cost: Set(supplier_cost),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("seed variant")
    }

    pub async fn seed_rule(
        &self,
        product_id: Uuid,
        min_quantity: i32,
        max_quantity: Option<i32>,
        config: serde_json::Value,
    ) -> PricingRuleModel {
        let now = Utc::now();
        pricing_rule::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(product_id),
            active: Set(true),
            min_quantity: Set(min_quantity),
            max_quantity: Set(max_quantity),
            config: Set(config),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("seed pricing rule")
    }
}

// Hand-written DDL: the entity money columns are declared at Postgres
// precision, which sea-query cannot express in SQLite DDL.
async fn create_schema(db: &DatabaseConnection) {
    let statements = [
        r#"CREATE TABLE products (
            id TEXT PRIMARY KEY NOT NULL,
            store_id TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            base_price REAL,
            active INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );"#,
        r#"CREATE TABLE product_variants (
            id TEXT PRIMARY KEY NOT NULL,
            product_id TEXT NOT NULL,
            sku TEXT NOT NULL UNIQUE,
            size TEXT,
            color TEXT,
            supplier_cost REAL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );"#,
        r#"CREATE TABLE pricing_rules (
            id TEXT PRIMARY KEY NOT NULL,
            product_id TEXT NOT NULL,
            active INTEGER NOT NULL,
            min_quantity INTEGER NOT NULL,
            max_quantity INTEGER,
            config TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );"#,
        r#"CREATE TABLE carts (
            id TEXT PRIMARY KEY NOT NULL,
            store_id TEXT NOT NULL,
            user_id TEXT,
            session_id TEXT,
            currency TEXT NOT NULL,
            total REAL NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );"#,
        r#"CREATE TABLE cart_items (
            id TEXT PRIMARY KEY NOT NULL,
            cart_id TEXT NOT NULL,
            product_id TEXT NOT NULL,
            variant_id TEXT NOT NULL,
            design_id TEXT,
            mockup_url TEXT,
            decoration TEXT,
            quantity INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );"#,
        r#"CREATE TABLE pricing_snapshots (
            id TEXT PRIMARY KEY NOT NULL,
            cart_item_id TEXT NOT NULL UNIQUE,
            base_price REAL NOT NULL,
            color_surcharge REAL NOT NULL,
            quantity_discount REAL NOT NULL,
            total_price REAL NOT NULL,
            breakdown TEXT NOT NULL,
            created_at TEXT NOT NULL
        );"#,
        r#"CREATE TABLE orders (
            id TEXT PRIMARY KEY NOT NULL,
            store_id TEXT NOT NULL,
            user_id TEXT,
            cart_id TEXT NOT NULL,
            order_number TEXT NOT NULL UNIQUE,
            payment_status TEXT NOT NULL,
            total_amount REAL NOT NULL,
            currency TEXT NOT NULL,
            shipping_address TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );"#,
        r#"CREATE TABLE order_items (
            id TEXT PRIMARY KEY NOT NULL,
            order_id TEXT NOT NULL,
            product_id TEXT NOT NULL,
            variant_id TEXT NOT NULL,
            sku TEXT NOT NULL,
            decoration TEXT,
            quantity INTEGER NOT NULL,
            unit_price REAL NOT NULL,
            total_price REAL NOT NULL,
            breakdown TEXT NOT NULL,
            created_at TEXT NOT NULL
        );"#,
        r#"CREATE TABLE payments (
            id TEXT PRIMARY KEY NOT NULL,
            order_id TEXT NOT NULL,
            amount REAL NOT NULL,
            currency TEXT NOT NULL,
            provider TEXT NOT NULL,
            transaction_id TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL
        );"#,
        r#"CREATE TABLE production_jobs (
            id TEXT PRIMARY KEY NOT NULL,
            order_id TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL,
            notes TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );"#,
        r#"CREATE TABLE production_steps (
            id TEXT PRIMARY KEY NOT NULL,
            job_id TEXT NOT NULL,
            sequence INTEGER NOT NULL,
            name TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );"#,
    ];

    for sql in statements {
        db.execute(Statement::from_string(DbBackend::Sqlite, sql.to_string()))
            .await
            .expect("create table");
    }
}

/// Standard screen-print rule config used across the tests.
pub fn standard_rule_config() -> serde_json::Value {
    serde_json::json!({
        "baseMarkupPercent": 50,
        "breaks": [
            { "minQty": 12, "unitMarkupDeltaPercent": -10 },
            { "minQty": 48, "unitMarkupDeltaPercent": -20, "fixedUnitDiscount": 0.25 }
        ],
        "decorationCosts": {
            "SCREEN_PRINT": {
                "perLocationFee": 1.50,
                "perColorFee": 0.60,
                "setupFee": 25.00
            }
        }
    })
}
