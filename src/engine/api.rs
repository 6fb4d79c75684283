//! Request execution
//!
//! `Api::handle` drives one request through the state machine:
//!
//! ```text
//! received -> preprocessed -> executed -> serialized -> postprocessed -> responded
//!                  |                                          |
//!                  +--> responded (hook answered)             +--> aborted
//!                  +--> aborted
//! ```
//!
//! Validation happens before any storage call. Writes check the request's
//! cancellation flag right before they are issued.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::catalog::{Catalog, EntityMeta, RelationshipDef};
use crate::document::{
    collect_included, needs_fetch, parse_linkage, primary_data, CodecRegistry, Deserializer,
    Document, DocumentError, RelationLoader, Serializer, WriteMode,
};
use crate::observability::Logger;
use crate::pagination::{link_header, paginate, PageDefaults, PageLinks};
use crate::query::{
    default_sort, Comparison, FieldPath, FilterNode, Operand, Operator, QuerySpec,
};
use crate::storage::{Changes, Entity, Storage, StorageError};

use super::context::{OperationState, RequestContext};
use super::errors::{ApiError, ApiResult};
use super::hooks::{HookRegistry, PostOutcome, PreOutcome};
use super::operation::{ApiRequest, ApiResponse, OperationKind};

/// Storage work done, body not built yet
enum Executed<'c> {
    Collection {
        meta: &'c EntityMeta,
        entities: Vec<Entity>,
        total: usize,
        spec: QuerySpec,
        /// Absolute URL the page links are built on
        endpoint: String,
    },
    Single {
        meta: &'c EntityMeta,
        entity: Option<Entity>,
        spec: QuerySpec,
        created: bool,
    },
    Linkage {
        meta: &'c EntityMeta,
        entity: Entity,
        id: String,
        relationship: &'c RelationshipDef,
    },
    NoContent,
}

/// The JSON:API engine
///
/// Catalog, hooks and codecs are frozen and shared; `Api` itself is cheap to
/// share behind an `Arc` across concurrent requests.
pub struct Api {
    catalog: Arc<Catalog>,
    storage: Arc<dyn Storage>,
    hooks: Arc<HookRegistry>,
    codecs: Arc<CodecRegistry>,
    pages: PageDefaults,
    base_url: String,
}

impl Api {
    pub fn new(catalog: Arc<Catalog>, storage: Arc<dyn Storage>) -> Self {
        Self {
            catalog,
            storage,
            hooks: Arc::new(HookRegistry::new()),
            codecs: Arc::new(CodecRegistry::new()),
            pages: PageDefaults::default(),
            base_url: String::new(),
        }
    }

    pub fn with_hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    pub fn with_codecs(mut self, codecs: CodecRegistry) -> Self {
        self.codecs = Arc::new(codecs);
        self
    }

    pub fn with_page_defaults(mut self, pages: PageDefaults) -> Self {
        self.pages = pages;
        self
    }

    /// Prefix of every generated link, e.g. `http://localhost:8080`
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Run one request to completion; never fails, errors become documents
    pub async fn handle(&self, request: ApiRequest) -> ApiResponse {
        let method = request.method;
        let collection = request.route.collection_name().to_string();

        let kind = match OperationKind::resolve(method, &request.route) {
            Ok(kind) => kind,
            Err(err) => {
                let response = ApiResponse::error(&err);
                let status = response.status.to_string();
                Logger::info(
                    "REQUEST_COMPLETE",
                    &[
                        ("collection", collection.as_str()),
                        ("method", method.as_str()),
                        ("status", status.as_str()),
                    ],
                );
                return response;
            }
        };

        let mut ctx = RequestContext::new(method, kind, collection)
            .with_id(request.route.id().map(String::from))
            .with_relation(request.route.relation().map(String::from))
            .with_query(request.query)
            .with_body(request.body)
            .with_cancellation(request.cancel);

        let response = match self.run(&mut ctx).await {
            Ok(response) => response,
            Err(err) => self.fail(&ctx, err),
        };

        let duration = ctx.elapsed_ms().to_string();
        let request_id = ctx.request_id.to_string();
        let status = response.status.to_string();
        Logger::info(
            "REQUEST_COMPLETE",
            &[
                ("collection", ctx.collection.as_str()),
                ("duration_ms", duration.as_str()),
                ("method", method.as_str()),
                ("operation", kind.name()),
                ("request_id", request_id.as_str()),
                ("status", status.as_str()),
            ],
        );
        response
    }

    fn fail(&self, ctx: &RequestContext, err: ApiError) -> ApiResponse {
        if err.is_server_error() {
            let error = err.to_string();
            let request_id = ctx.request_id.to_string();
            Logger::error(
                "STORAGE_FAILURE",
                &[
                    ("collection", ctx.collection.as_str()),
                    ("error", error.as_str()),
                    ("operation", ctx.kind.name()),
                    ("request_id", request_id.as_str()),
                ],
            );
        }
        ApiResponse::error(&err)
    }

    async fn run(&self, ctx: &mut RequestContext) -> ApiResult<ApiResponse> {
        // Unknown endpoints fail before any hook runs
        let meta = self.catalog.resolve(&ctx.collection)?;
        if let Some(relation) = &ctx.relation {
            relationship(meta, relation)?;
        }

        if let Some(response) = self.preprocess(ctx).await? {
            return Ok(response);
        }

        let meta = self.catalog.resolve(&ctx.collection)?;
        let executed = self.execute(ctx, meta).await?;
        ctx.advance(OperationState::Executed)?;

        let mut response = self.serialize(executed).await?;
        ctx.advance(OperationState::Serialized)?;

        self.postprocess(ctx, &mut response).await?;
        ctx.advance(OperationState::Responded)?;
        Ok(response)
    }

    /// Returns a response when a hook answered the request itself
    async fn preprocess(&self, ctx: &mut RequestContext) -> ApiResult<Option<ApiResponse>> {
        let collection = ctx.collection.clone();
        for hook in self.hooks.preprocessors(&collection, ctx.kind) {
            // Hooks work on a draft so an abort leaves no trace
            let mut draft = ctx.clone();
            match hook.process(&mut draft).await {
                PreOutcome::Continue => *ctx = draft,
                PreOutcome::Respond(response) => {
                    *ctx = draft;
                    ctx.advance(OperationState::Preprocessed)?;
                    ctx.advance(OperationState::Responded)?;
                    return Ok(Some(response));
                }
                PreOutcome::Abort(abort) => {
                    ctx.advance(OperationState::Preprocessed)?;
                    ctx.advance(OperationState::Aborted)?;
                    log_abort(ctx, "preprocess", abort.status, &abort.detail);
                    return Err(ApiError::Hook(abort));
                }
            }
        }
        ctx.advance(OperationState::Preprocessed)?;
        Ok(None)
    }

    async fn postprocess(
        &self,
        ctx: &mut RequestContext,
        response: &mut ApiResponse,
    ) -> ApiResult<()> {
        let mut meta: Map<String, Value> = ctx.meta.clone();
        for hook in self.hooks.postprocessors(&ctx.collection, ctx.kind) {
            if let PostOutcome::Abort(abort) = hook.process(&*ctx, &mut meta).await {
                ctx.advance(OperationState::Postprocessed)?;
                ctx.advance(OperationState::Aborted)?;
                log_abort(ctx, "postprocess", abort.status, &abort.detail);
                return Err(ApiError::Hook(abort));
            }
        }
        ctx.advance(OperationState::Postprocessed)?;

        if let Some(document) = response.document.as_mut() {
            for (key, value) in &meta {
                document.meta.insert(key.clone(), value.clone());
            }
        }
        ctx.meta = meta;
        Ok(())
    }

    async fn execute<'c>(
        &'c self,
        ctx: &RequestContext,
        meta: &'c EntityMeta,
    ) -> ApiResult<Executed<'c>> {
        match ctx.kind {
            OperationKind::CollectionFetch => self.fetch_collection(ctx, meta).await,
            OperationKind::ResourceFetch => self.fetch_resource(ctx, meta).await,
            OperationKind::Create => self.create(ctx, meta).await,
            OperationKind::Update => self.update(ctx, meta).await,
            OperationKind::Delete => self.delete(ctx, meta).await,
            OperationKind::RelationshipFetch => self.fetch_relationship(ctx, meta).await,
            OperationKind::RelationshipAdd
            | OperationKind::RelationshipReplace
            | OperationKind::RelationshipRemove => self.mutate_relationship(ctx, meta).await,
            OperationKind::RelatedFetch => self.fetch_related(ctx, meta).await,
        }
    }

    async fn fetch_collection<'c>(
        &'c self,
        ctx: &RequestContext,
        meta: &'c EntityMeta,
    ) -> ApiResult<Executed<'c>> {
        let spec = QuerySpec::parse(&self.catalog, meta, &ctx.query, &self.pages)?;
        let (limit, offset) = paginate(&spec);
        let output = self
            .storage
            .query(meta, &spec.filter, &spec.sort, limit, offset)
            .await?;

        Ok(Executed::Collection {
            meta,
            entities: output.entities,
            total: output.total,
            endpoint: format!("{}/{}", self.base_url, meta.collection()),
            spec,
        })
    }

    async fn fetch_resource<'c>(
        &'c self,
        ctx: &RequestContext,
        meta: &'c EntityMeta,
    ) -> ApiResult<Executed<'c>> {
        let id = route_id(ctx)?;
        let spec = QuerySpec::parse(&self.catalog, meta, &ctx.query, &self.pages)?;
        let entity = self.existing(meta, &id).await?;
        Ok(Executed::Single {
            meta,
            entity: Some(entity),
            spec,
            created: false,
        })
    }

    async fn create<'c>(
        &'c self,
        ctx: &RequestContext,
        meta: &'c EntityMeta,
    ) -> ApiResult<Executed<'c>> {
        let spec = QuerySpec::parse(&self.catalog, meta, &ctx.query, &self.pages)?;
        let plan = Deserializer::new(meta, &self.codecs).deserialize(body(ctx)?, WriteMode::Create)?;

        if let Some(id) = &plan.id {
            if self.storage.fetch_by_id(meta, id).await?.is_some() {
                return Err(DocumentError::Conflict(format!(
                    "'{}' already has a resource with id '{}'",
                    meta.collection(),
                    id
                ))
                .into());
            }
        }
        self.check_linkages(meta, &plan.changes).await?;

        ctx.ensure_not_cancelled()?;
        let entity = self
            .storage
            .create(meta, plan.id.as_deref(), &plan.changes)
            .await?;

        Ok(Executed::Single {
            meta,
            entity: Some(entity),
            spec,
            created: true,
        })
    }

    async fn update<'c>(
        &'c self,
        ctx: &RequestContext,
        meta: &'c EntityMeta,
    ) -> ApiResult<Executed<'c>> {
        let id = route_id(ctx)?;
        let spec = QuerySpec::parse(&self.catalog, meta, &ctx.query, &self.pages)?;
        let plan = Deserializer::new(meta, &self.codecs)
            .deserialize(body(ctx)?, WriteMode::Update(&id))?;

        let existing = self.existing(meta, &id).await?;
        let id = existing.id(meta).unwrap_or(id);
        self.check_linkages(meta, &plan.changes).await?;

        ctx.ensure_not_cancelled()?;
        let entity = self.storage.update(meta, &id, &plan.changes).await?;

        Ok(Executed::Single {
            meta,
            entity: Some(entity),
            spec,
            created: false,
        })
    }

    async fn delete<'c>(
        &'c self,
        ctx: &RequestContext,
        meta: &'c EntityMeta,
    ) -> ApiResult<Executed<'c>> {
        let id = route_id(ctx)?;
        ctx.ensure_not_cancelled()?;
        if !self.storage.delete(meta, &id).await? {
            return Err(StorageError::not_found(meta.collection(), id).into());
        }
        Ok(Executed::NoContent)
    }

    async fn fetch_relationship<'c>(
        &'c self,
        ctx: &RequestContext,
        meta: &'c EntityMeta,
    ) -> ApiResult<Executed<'c>> {
        let id = route_id(ctx)?;
        let relationship = relationship(meta, route_relation(ctx)?)?;
        let entity = self.existing(meta, &id).await?;
        let id = entity.id(meta).unwrap_or(id);
        Ok(Executed::Linkage {
            meta,
            entity,
            id,
            relationship,
        })
    }

    async fn mutate_relationship<'c>(
        &'c self,
        ctx: &RequestContext,
        meta: &'c EntityMeta,
    ) -> ApiResult<Executed<'c>> {
        let id = route_id(ctx)?;
        let relationship = relationship(meta, route_relation(ctx)?)?;
        let options = meta.options();

        match ctx.kind {
            OperationKind::RelationshipAdd | OperationKind::RelationshipRemove
                if !relationship.is_to_many() =>
            {
                return Err(ApiError::forbidden(format!(
                    "'{}' is a to-one relationship; replace it with PATCH",
                    relationship.name
                )));
            }
            OperationKind::RelationshipReplace
                if relationship.is_to_many() && !options.allow_to_many_replacement =>
            {
                return Err(ApiError::forbidden(format!(
                    "Full replacement of '{}' is not allowed",
                    relationship.name
                )));
            }
            OperationKind::RelationshipRemove if !options.allow_delete_from_to_many => {
                return Err(ApiError::forbidden(format!(
                    "Removing members of '{}' is not allowed",
                    relationship.name
                )));
            }
            _ => {}
        }

        let requested = parse_linkage(relationship, primary_data(body(ctx)?)?, "/data")?;
        let entity = self.existing(meta, &id).await?;
        let id = entity.id(meta).unwrap_or(id);
        self.check_linkages(meta, &Changes::relation(&relationship.name, requested.clone()))
            .await?;

        ctx.ensure_not_cancelled()?;
        let members: Vec<String> = requested.ids().into_iter().map(String::from).collect();
        match ctx.kind {
            OperationKind::RelationshipAdd => {
                self.storage
                    .add_members(meta, &id, relationship, &members)
                    .await?
            }
            OperationKind::RelationshipRemove => {
                self.storage
                    .remove_members(meta, &id, relationship, &members)
                    .await?
            }
            _ => {
                self.storage
                    .update(meta, &id, &Changes::relation(&relationship.name, requested))
                    .await?;
            }
        }
        Ok(Executed::NoContent)
    }

    async fn fetch_related<'c>(
        &'c self,
        ctx: &RequestContext,
        meta: &'c EntityMeta,
    ) -> ApiResult<Executed<'c>> {
        let id = route_id(ctx)?;
        let relationship = relationship(meta, route_relation(ctx)?)?;
        let target = self.catalog.resolve(&relationship.target)?;
        let spec = QuerySpec::parse(&self.catalog, target, &ctx.query, &self.pages)?;

        let entity = self.existing(meta, &id).await?;
        let id = entity.id(meta).unwrap_or(id);
        let parents = BTreeSet::from([id.clone()]);
        let mut related = self
            .storage
            .fetch_related(meta, relationship, &parents)
            .await?
            .remove(&id)
            .unwrap_or_default();

        if !relationship.is_to_many() {
            return Ok(Executed::Single {
                meta: target,
                entity: (!related.is_empty()).then(|| related.swap_remove(0)),
                spec,
                created: false,
            });
        }

        // Filter, sort and page the related set through storage
        let ids: Vec<String> = related.iter().filter_map(|e| e.id(target)).collect();
        let (limit, offset) = paginate(&spec);
        let (entities, total) = if ids.is_empty() {
            (Vec::new(), 0)
        } else {
            let members = id_filter(&self.catalog, target, ids.iter().map(String::as_str))?;
            let filter = members.and(spec.filter.clone());
            let output = self
                .storage
                .query(target, &filter, &spec.sort, limit, offset)
                .await?;
            (output.entities, output.total)
        };

        Ok(Executed::Collection {
            meta: target,
            entities,
            total,
            endpoint: format!(
                "{}/{}/{}/{}",
                self.base_url,
                meta.collection(),
                id,
                relationship.name
            ),
            spec,
        })
    }

    async fn serialize(&self, executed: Executed<'_>) -> ApiResult<ApiResponse> {
        let serializer = Serializer::new(&self.catalog, &self.codecs, &self.base_url);
        let mut loader = RelationLoader::new(self.storage.as_ref());

        match executed {
            Executed::Collection {
                meta,
                entities,
                total,
                spec,
                endpoint,
            } => {
                let data = serializer
                    .serialize_many(&mut loader, meta, &entities, &spec.fieldsets)
                    .await?;
                let included = collect_included(
                    &serializer,
                    &mut loader,
                    meta,
                    &entities,
                    &spec.include,
                    &spec.fieldsets,
                )
                .await?;

                let links = PageLinks::build(&endpoint, &spec.raw, &spec.page, total);
                let mut document = Document::collection(data)
                    .with_included(included)
                    .with_links(links.to_value());
                document.meta.insert("total".into(), json!(total));
                Ok(ApiResponse::ok(document).with_header("Link", link_header(&links)))
            }

            Executed::Single {
                meta,
                entity,
                spec,
                created,
            } => {
                let Some(entity) = entity else {
                    return Ok(ApiResponse::ok(Document::resource(None)));
                };
                let resource = serializer
                    .serialize_one(&mut loader, meta, &entity, &spec.fieldsets)
                    .await?;
                let included = collect_included(
                    &serializer,
                    &mut loader,
                    meta,
                    std::slice::from_ref(&entity),
                    &spec.include,
                    &spec.fieldsets,
                )
                .await?;

                let location = resource
                    .as_ref()
                    .and_then(|r| r.links.as_ref())
                    .map(|links| links.self_link.clone());
                let document = Document::resource(resource).with_included(included);
                if !created {
                    return Ok(ApiResponse::ok(document));
                }
                let response = ApiResponse::with_status(201, document);
                Ok(match location {
                    Some(location) => response.with_header("Location", location),
                    None => response,
                })
            }

            Executed::Linkage {
                meta,
                entity,
                id,
                relationship,
            } => {
                if needs_fetch(relationship) {
                    loader
                        .load(meta, relationship, &BTreeSet::from([id.clone()]))
                        .await?;
                }
                let linkage = serializer.linkage(&loader, meta, &entity, &id, relationship)?;
                let links = serializer.relationship_links(meta.collection(), &id, &relationship.name);
                let document = Document::linkage(linkage).with_links(json!({
                    "self": links.self_link,
                    "related": links.related,
                }));
                Ok(ApiResponse::ok(document))
            }

            Executed::NoContent => Ok(ApiResponse::no_content()),
        }
    }

    async fn existing(&self, meta: &EntityMeta, id: &str) -> ApiResult<Entity> {
        self.storage
            .fetch_by_id(meta, id)
            .await?
            .ok_or_else(|| StorageError::not_found(meta.collection(), id).into())
    }

    /// Every linked id must exist; one query per relationship
    async fn check_linkages(&self, meta: &EntityMeta, changes: &Changes) -> ApiResult<()> {
        for (name, change) in &changes.relationships {
            let Some(relationship) = meta.relationship(name) else {
                continue;
            };
            let ids: BTreeSet<&str> = change.ids().into_iter().collect();
            if ids.is_empty() {
                continue;
            }

            let target = self.catalog.resolve(&relationship.target)?;
            let filter = id_filter(&self.catalog, target, ids.iter().copied())?;
            let output = self
                .storage
                .query(target, &filter, &default_sort(target), ids.len(), 0)
                .await?;
            let found: BTreeSet<String> = output
                .entities
                .iter()
                .filter_map(|e| e.id(target))
                .collect();

            if let Some(missing) = ids.iter().find(|id| !found.contains(**id)) {
                return Err(StorageError::related_not_found(target.collection(), *missing).into());
            }
        }
        Ok(())
    }
}

/// Predicate matching any of `ids` by primary key
fn id_filter<'i>(
    catalog: &Catalog,
    target: &EntityMeta,
    ids: impl IntoIterator<Item = &'i str>,
) -> ApiResult<FilterNode> {
    let mut alternatives = Vec::new();
    for id in ids {
        let key = target
            .parse_id(id)
            .ok_or_else(|| StorageError::related_not_found(target.collection(), id))?;
        let mut terms = Vec::with_capacity(key.len());
        for (column, value) in key {
            let steps = catalog.resolve_field_path(target.collection(), &column)?;
            terms.push(FilterNode::Compare(Comparison {
                path: FieldPath { raw: column, steps },
                op: Operator::Eq,
                operand: Operand::Value(value),
            }));
        }
        alternatives.push(FilterNode::And(terms));
    }
    Ok(FilterNode::Or(alternatives))
}

fn relationship<'m>(meta: &'m EntityMeta, name: &str) -> ApiResult<&'m RelationshipDef> {
    meta.relationship(name)
        .ok_or_else(|| ApiError::UnknownRelationship {
            collection: meta.collection().to_string(),
            relation: name.to_string(),
        })
}

fn route_id(ctx: &RequestContext) -> ApiResult<String> {
    ctx.id
        .clone()
        .ok_or_else(|| ApiError::internal(format!("{} request without an id", ctx.kind.name())))
}

fn route_relation(ctx: &RequestContext) -> ApiResult<&str> {
    ctx.relation
        .as_deref()
        .ok_or_else(|| ApiError::internal(format!("{} request without a relation", ctx.kind.name())))
}

fn body(ctx: &RequestContext) -> ApiResult<&Value> {
    ctx.body
        .as_ref()
        .ok_or_else(|| DocumentError::invalid("", "request body is required").into())
}

fn log_abort(ctx: &RequestContext, stage: &str, status: u16, detail: &str) {
    let request_id = ctx.request_id.to_string();
    let status = status.to_string();
    Logger::warn(
        "HOOK_ABORT",
        &[
            ("collection", ctx.collection.as_str()),
            ("detail", detail),
            ("operation", ctx.kind.name()),
            ("request_id", request_id.as_str()),
            ("stage", stage),
            ("status", status.as_str()),
        ],
    );
}
