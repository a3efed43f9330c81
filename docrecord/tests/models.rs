use docrecord::prelude::*;
use serde::{Deserialize, Serialize};
use std::{sync::Mutex, time::Duration};

fn database() -> Database {
    Database::builder()
        .connection("primary", InMemoryStore::builder())
        .build()
}

fn join_tags(value: Bson) -> Bson {
    match value {
        Bson::Array(tags) => Bson::String(
            tags.iter()
                .filter_map(Bson::as_str)
                .collect::<Vec<_>>()
                .join(","),
        ),
        other => other,
    }
}

fn split_tags(value: Bson) -> Bson {
    match value {
        Bson::String(tags) => Bson::Array(
            tags.split(',')
                .filter(|tag| !tag.is_empty())
                .map(|tag| Bson::String(tag.to_string()))
                .collect(),
        ),
        other => other,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Account {
    name: String,
    email: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    nickname: Option<String>,
    #[serde(default)]
    created_at: Option<bson::DateTime>,
    #[serde(default)]
    updated_at: Option<bson::DateTime>,
}

impl Account {
    fn new(name: &str, email: &str) -> Self {
        Self {
            name: name.to_string(),
            email: email.to_string(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Model for Account {
    fn collection_name() -> &'static str {
        "accounts"
    }

    fn boot(meta: &mut ModelMeta<Self>) {
        meta.column(
            "email",
            Column::new().prepare(|value| match value {
                Bson::String(email) => Bson::String(email.to_lowercase()),
                other => other,
            }),
        )
        .column(
            "tags",
            Column::new()
                .named("tag_list")
                .prepare(join_tags)
                .consume(split_tags),
        )
        .column("password", Column::new().serialize(false))
        .column(
            "nickname",
            Column::new().serialize_as(SerializeAs::Rename("alias".to_string())),
        )
        .computed(
            "display",
            Computed::new(|account: &Account| {
                Ok(Bson::String(format!("{} <{}>", account.name, account.email)))
            }),
        )
        .timestamp("created_at", Timestamp::created())
        .timestamp("updated_at", Timestamp::updated());
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Member {
    name: String,
    email: String,
    #[serde(default)]
    role: Option<String>,
}

#[async_trait]
impl Model for Member {
    fn collection_name() -> &'static str {
        "members"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Product {
    code: String,
    name: String,
}

#[async_trait]
impl Model for Product {
    fn collection_name() -> &'static str {
        "products"
    }

    fn boot(meta: &mut ModelMeta<Self>) {
        meta.column("code", Column::new().primary().named("sku"));
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Metric {
    name: String,
}

#[async_trait]
impl Model for Metric {
    fn collection_name() -> &'static str {
        "metrics"
    }

    fn connection_name() -> Option<&'static str> {
        Some("analytics")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Contact {
    email: String,
}

#[async_trait]
impl Model for Contact {
    fn collection_name() -> &'static str {
        "contacts"
    }

    async fn before_save(record: &mut Record<Self>) -> OdmResult<()> {
        match record.email.contains('@') {
            true => Ok(()),
            false => Err(OdmError::hook(format!("invalid email {}", record.email))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Article {
    title: String,
    #[serde(default)]
    hidden: bool,
    #[serde(default)]
    loaded: bool,
}

#[async_trait]
impl Model for Article {
    fn collection_name() -> &'static str {
        "articles"
    }

    async fn before_find(query: ModelQuery<Self>) -> OdmResult<ModelQuery<Self>> {
        Ok(query.where_eq("hidden", false))
    }

    async fn after_find(record: &mut Record<Self>) -> OdmResult<()> {
        record.loaded = true;
        Ok(())
    }
}

static BATCH_SAVED: Mutex<Vec<String>> = Mutex::new(Vec::new());

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Batched {
    name: String,
}

#[async_trait]
impl Model for Batched {
    fn collection_name() -> &'static str {
        "batched"
    }

    async fn before_save(record: &mut Record<Self>) -> OdmResult<()> {
        match record.name.as_str() {
            "bad" => Err(OdmError::hook("rejected")),
            _ => Ok(()),
        }
    }

    async fn after_create(_record: &mut Record<Self>) -> OdmResult<()> {
        tokio::task::yield_now().await;
        Ok(())
    }

    async fn after_save(record: &mut Record<Self>) -> OdmResult<()> {
        BATCH_SAVED.lock().unwrap().push(record.name.clone());
        Ok(())
    }
}

static AUDIT_LOG: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

fn audit(event: &'static str) {
    AUDIT_LOG.lock().unwrap().push(event);
}

fn take_audit_log() -> Vec<&'static str> {
    std::mem::take(&mut *AUDIT_LOG.lock().unwrap())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Audited {
    title: String,
}

#[async_trait]
impl Model for Audited {
    fn collection_name() -> &'static str {
        "audited"
    }

    fn boot(meta: &mut ModelMeta<Self>) {
        meta.pre_persist(|_, _| {
            audit("pre_persist");
            Ok(())
        })
        .post_persist(|_, _| {
            audit("post_persist");
            Ok(())
        });
    }

    async fn before_save(_record: &mut Record<Self>) -> OdmResult<()> {
        audit("before_save");
        Ok(())
    }

    async fn after_save(_record: &mut Record<Self>) -> OdmResult<()> {
        audit("after_save");
        Ok(())
    }

    async fn before_create(_record: &mut Record<Self>) -> OdmResult<()> {
        audit("before_create");
        Ok(())
    }

    async fn after_create(_record: &mut Record<Self>) -> OdmResult<()> {
        audit("after_create");
        Ok(())
    }

    async fn before_update(_record: &mut Record<Self>) -> OdmResult<()> {
        audit("before_update");
        Ok(())
    }

    async fn after_update(_record: &mut Record<Self>) -> OdmResult<()> {
        audit("after_update");
        Ok(())
    }

    async fn before_delete(_record: &mut Record<Self>) -> OdmResult<()> {
        audit("before_delete");
        Ok(())
    }

    async fn after_delete(_record: &mut Record<Self>) -> OdmResult<()> {
        audit("after_delete");
        Ok(())
    }
}

#[tokio::test]
async fn test_create_and_find() {
    let db = database();

    let account = Account::create(&db, Account::new("Ada", "Ada@Example.COM"))
        .await
        .unwrap();

    assert!(account.is_persisted());
    let Some(Bson::ObjectId(oid)) = account.id().cloned() else {
        panic!("expected an object id, got {:?}", account.id());
    };

    let by_id = Account::find(&db, oid).await.unwrap().unwrap();
    let by_hex = Account::find(&db, oid.to_hex()).await.unwrap().unwrap();

    assert_eq!(by_id.model(), account.model());
    assert_eq!(by_hex.id(), account.id());
    assert_eq!(by_id.email, "ada@example.com");

    let by_name = Account::find_by(&db, "name", "Ada").await.unwrap();
    assert!(by_name.is_some());
    assert!(Account::find(&db, ObjectId::new()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_prepare_and_consume_round_trip() {
    let db = database();

    let mut account = Account::new("Ada", "ADA@example.com");
    account.tags = vec!["math".to_string(), "engines".to_string()];

    let record = Account::create(&db, account).await.unwrap();

    let stored = db
        .collection("accounts")
        .first()
        .await
        .unwrap()
        .unwrap();

    assert_eq!(stored.get_str("email").unwrap(), "ada@example.com");
    assert_eq!(stored.get_str("tag_list").unwrap(), "math,engines");
    assert!(!stored.contains_key("tags"));

    assert_eq!(record.tags, vec!["math".to_string(), "engines".to_string()]);
    assert_eq!(
        record.to_object().unwrap().get_str("tag_list").unwrap(),
        "math,engines"
    );
}

#[tokio::test]
async fn test_serialization_policy() {
    let db = database();

    let mut account = Account::new("Ada", "ada@example.com");
    account.password = Some("secret".to_string());
    account.nickname = Some("countess".to_string());

    let record = Account::create(&db, account).await.unwrap();
    let serialized = record.serialize().unwrap();

    assert_eq!(serialized.get("_id"), record.id());
    assert_eq!(serialized.get_str("name").unwrap(), "Ada");
    assert_eq!(serialized.get_str("alias").unwrap(), "countess");
    assert_eq!(serialized.get_str("display").unwrap(), "Ada <ada@example.com>");
    assert!(!serialized.contains_key("password"));
    assert!(!serialized.contains_key("nickname"));

    let json = record.to_json().unwrap();
    assert_eq!(json["alias"], "countess");
    assert!(json.get("password").is_none());
}

#[tokio::test]
async fn test_timestamps_are_stamped_once_on_create() {
    let db = database();

    let mut record = Account::create(&db, Account::new("Ada", "ada@example.com"))
        .await
        .unwrap();

    let created_at = record.created_at.unwrap();
    assert_eq!(record.updated_at, Some(created_at));

    tokio::time::sleep(Duration::from_millis(10)).await;

    record.name = "Ada Lovelace".to_string();
    record.save().await.unwrap();

    let first_update = record.updated_at.unwrap();
    assert_eq!(record.created_at, Some(created_at));
    assert!(first_update > created_at);

    tokio::time::sleep(Duration::from_millis(10)).await;
    record.save().await.unwrap();

    assert_eq!(record.created_at, Some(created_at));
    assert!(record.updated_at.unwrap() > first_update);
    assert_eq!(Account::metadata().timestamps().count(), 2);
}

#[tokio::test]
async fn test_dirty_tracking() {
    let db = database();

    let mut record = Record::new(&db, Member {
        name: "Ada".to_string(),
        email: "ada@example.com".to_string(),
        role: None,
    });
    assert!(record.is_new());
    assert!(record.is_dirty());

    record.save().await.unwrap();
    assert!(!record.is_dirty());
    assert!(record.dirty().unwrap().is_empty());

    record.name = "Grace".to_string();
    record.set_attribute("role", "admin").unwrap();

    assert_eq!(record.dirty().unwrap(), doc! { "name": "Grace", "role": "admin" });
    assert!(record.is_dirty_key("name"));
    assert!(!record.is_dirty_key("email"));
    assert!(record.is_dirty_any(["email", "role"]));
    assert_eq!(record.get_attribute("role").unwrap(), Some(Bson::String("admin".into())));
    assert_eq!(record.get_attribute("_id").unwrap(), record.id().cloned());

    record.save().await.unwrap();
    assert!(!record.is_dirty());

    let stored = Member::find(&db, record.id().cloned().unwrap()).await.unwrap().unwrap();
    assert_eq!(stored.role.as_deref(), Some("admin"));
}

#[tokio::test]
async fn test_hook_order() {
    let db = database();
    take_audit_log();

    let mut record = Audited::create(&db, Audited { title: "draft".to_string() })
        .await
        .unwrap();

    assert_eq!(
        take_audit_log(),
        vec![
            "pre_persist",
            "before_save",
            "before_create",
            "post_persist",
            "after_create",
            "after_save",
        ]
    );

    record.title = "final".to_string();
    record.save().await.unwrap();

    assert_eq!(
        take_audit_log(),
        vec![
            "pre_persist",
            "before_save",
            "before_update",
            "post_persist",
            "after_update",
            "after_save",
        ]
    );

    record.delete().await.unwrap();

    assert_eq!(take_audit_log(), vec!["before_delete", "after_delete"]);
    assert!(record.is_deleted());
}

#[tokio::test]
async fn test_failing_hook_aborts_save() {
    let db = database();

    let err = Contact::create(&db, Contact { email: "nobody".to_string() })
        .await
        .unwrap_err();

    assert!(matches!(err, OdmError::Hook(_)));
    assert_eq!(db.collection("contacts").count().await.unwrap(), 0);

    Contact::create(&db, Contact { email: "ada@example.com".to_string() })
        .await
        .unwrap();
    assert_eq!(db.collection("contacts").count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_find_hooks() {
    let db = database();

    db.collection("articles")
        .insert_many(vec![
            doc! { "title": "public", "hidden": false },
            doc! { "title": "secret", "hidden": true },
        ])
        .await
        .unwrap();

    let all = Article::all(&db).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].title, "public");
    assert!(all[0].loaded);

    let secret = Article::find_by(&db, "title", "secret").await.unwrap();
    assert!(secret.is_none());

    assert_eq!(Article::query(&db).count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_first_or_create_does_not_modify_existing() {
    let db = database();

    Member::create(&db, Member {
        name: "Ada".to_string(),
        email: "ada@example.com".to_string(),
        role: None,
    })
    .await
    .unwrap();

    let found = Member::first_or_create(
        &db,
        doc! { "email": "ada@example.com" },
        doc! { "name": "Changed", "role": "admin" },
    )
    .await
    .unwrap();

    assert_eq!(found.name, "Ada");
    assert_eq!(found.role, None);
    assert_eq!(Member::query(&db).count().await.unwrap(), 1);

    let created = Member::first_or_create(
        &db,
        doc! { "email": "grace@example.com" },
        doc! { "name": "Grace" },
    )
    .await
    .unwrap();

    assert!(created.is_persisted());
    assert_eq!(created.email, "grace@example.com");
    assert_eq!(Member::query(&db).count().await.unwrap(), 2);

    let fresh = Member::first_or_new(
        &db,
        doc! { "email": "alan@example.com" },
        doc! { "name": "Alan" },
    )
    .await
    .unwrap();

    assert!(fresh.is_new());
    assert_eq!(fresh.name, "Alan");
    assert_eq!(Member::query(&db).count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_update_or_create() {
    let db = database();

    let created = Member::update_or_create(
        &db,
        doc! { "email": "ada@example.com" },
        doc! { "name": "Ada" },
    )
    .await
    .unwrap();

    let updated = Member::update_or_create(
        &db,
        doc! { "email": "ada@example.com" },
        doc! { "name": "Ada", "role": "admin" },
    )
    .await
    .unwrap();

    assert_eq!(created.id(), updated.id());
    assert_eq!(updated.role.as_deref(), Some("admin"));
    assert_eq!(Member::query(&db).count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_delete_and_refresh() {
    let db = database();

    let mut unsaved = Record::new(&db, Member::default());
    assert!(matches!(
        unsaved.delete().await,
        Err(OdmError::ModelPrimaryKeyMissing(model, op)) if model == "Member" && op == "delete"
    ));

    let mut record = Member::create(&db, Member::default()).await.unwrap();
    let mut copy = record.clone();

    record.delete().await.unwrap();

    assert!(record.is_deleted());
    assert!(Member::find(&db, record.id().cloned().unwrap()).await.unwrap().is_none());
    assert!(matches!(copy.refresh().await, Err(OdmError::DocumentNotFound(_, collection)) if collection == "members"));
}

#[tokio::test]
async fn test_custom_primary_key() {
    let db = database();

    let product = Product::create(&db, Product {
        code: "abc-1".to_string(),
        name: "Widget".to_string(),
    })
    .await
    .unwrap();

    assert_eq!(Product::primary_key(), "sku");
    assert_eq!(product.id(), Some(&Bson::String("abc-1".to_string())));

    let found = Product::find(&db, "abc-1").await.unwrap().unwrap();
    assert_eq!(found.name, "Widget");

    let stored = db.collection("products").first().await.unwrap().unwrap();
    assert_eq!(stored.get_str("sku").unwrap(), "abc-1");
    assert!(!product.serialize().unwrap().contains_key("_id"));
}

#[tokio::test]
async fn test_hex_like_custom_primary_key() {
    let db = database();
    let sku = "507f1f77bcf86cd799439011";

    let product = Product::create(&db, Product {
        code: sku.to_string(),
        name: "Gadget".to_string(),
    })
    .await
    .unwrap();

    assert_eq!(product.id(), Some(&Bson::String(sku.to_string())));

    let found = Product::find(&db, sku).await.unwrap().unwrap();
    assert_eq!(found.name, "Gadget");
}

#[tokio::test]
async fn test_projected_reads() {
    let db = database();

    Product::create(&db, Product {
        code: "abc-2".to_string(),
        name: "Sprocket".to_string(),
    })
    .await
    .unwrap();

    let hydrated = Product::query(&db).select(["name"]).exec().await;
    assert!(matches!(hydrated, Err(OdmError::Serialization(_))));

    let raw = Product::query(&db)
        .into_builder()
        .select(["name"])
        .exec()
        .await
        .unwrap();
    assert_eq!(raw[0].get_str("name").unwrap(), "Sprocket");
    assert!(!raw[0].contains_key("sku"));
}

#[tokio::test]
async fn test_create_many_finishes_every_create() {
    let db = database();

    let result = Batched::create_many(&db, vec![
        Batched { name: "ok".to_string() },
        Batched { name: "bad".to_string() },
    ])
    .await;

    assert!(matches!(result, Err(OdmError::Hook(_))));
    assert_eq!(Batched::query(&db).count().await.unwrap(), 1);
    assert_eq!(*BATCH_SAVED.lock().unwrap(), vec!["ok".to_string()]);
}

#[tokio::test]
async fn test_models_use_their_connection() {
    let db = Database::builder()
        .connection("primary", InMemoryStore::builder())
        .connection("analytics", InMemoryStore::builder())
        .build();

    Metric::create(&db, Metric { name: "visits".to_string() })
        .await
        .unwrap();

    assert_eq!(db.collection("metrics").count().await.unwrap(), 0);
    assert_eq!(db.collection_on("analytics", "metrics").count().await.unwrap(), 1);
    assert_eq!(Metric::all(&db).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_create_many_and_paginate() {
    let db = database();

    let members = (0..25)
        .map(|n| Member {
            name: format!("member-{n:02}"),
            email: format!("m{n}@example.com"),
            role: None,
        })
        .collect::<Vec<_>>();

    let created = Member::create_many(&db, members).await.unwrap();
    assert_eq!(created[3].name, "member-03");

    let page = Member::query(&db)
        .order_by_asc("name")
        .paginate(2, 10)
        .await
        .unwrap();

    assert_eq!(page.total, 25);
    assert_eq!(page.last_page, 3);
    assert_eq!(page.data.len(), 10);
    assert_eq!(page.data[0].name, "member-10");
    assert_eq!(page.next_page(), Some(3));
    assert_eq!(page.previous_page(), Some(1));

    assert_eq!(Member::truncate(&db).await.unwrap(), 25);
    assert!(Member::first(&db).await.unwrap().is_none());
}

#[tokio::test]
async fn test_fill_and_merge() {
    let db = database();

    let mut record = Record::<Account>::from_document(
        &db,
        doc! { "name": "Ada", "email": "ADA@example.com", "tag_list": "a,b" },
    )
    .unwrap();

    assert!(record.is_new());
    assert_eq!(record.tags, vec!["a".to_string(), "b".to_string()]);

    record.fill(doc! { "name": "Ada Lovelace" }).unwrap();
    let record = record.merge(doc! { "nickname": "countess" }).unwrap();

    assert_eq!(record.name, "Ada Lovelace");
    assert_eq!(record.nickname.as_deref(), Some("countess"));
}
