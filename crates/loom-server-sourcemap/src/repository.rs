// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Repository layer for association persistence.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, instrument};

use loom_sourcemap_core::{ArtifactKind, Association, AssociationId, ProjectId, ValidationReport};

use crate::error::{Result, SourcemapServerError};

const MIGRATIONS: &[&str] = &[
	r#"
	CREATE TABLE IF NOT EXISTS sourcemap_associations (
		id TEXT PRIMARY KEY,
		project_id TEXT NOT NULL,
		version TEXT NOT NULL,
		source_version_ref TEXT NOT NULL,
		sourcemap_version_ref TEXT NOT NULL,
		is_active INTEGER NOT NULL DEFAULT 0,
		validation TEXT NOT NULL,
		created_at TEXT NOT NULL
	)
	"#,
	r#"
	CREATE INDEX IF NOT EXISTS idx_sourcemap_associations_project
		ON sourcemap_associations(project_id, created_at)
	"#,
	r#"
	CREATE UNIQUE INDEX IF NOT EXISTS idx_sourcemap_associations_one_active
		ON sourcemap_associations(project_id) WHERE is_active = 1
	"#,
];

/// Repository trait for association operations.
#[async_trait]
pub trait AssociationRepository: Send + Sync {
	async fn create_association(&self, association: &Association) -> Result<()>;
	async fn get_association(
		&self,
		project_id: &ProjectId,
		id: AssociationId,
	) -> Result<Option<Association>>;
	/// Associations of a project ordered by creation time, optionally for one version label.
	async fn list_associations(
		&self,
		project_id: &ProjectId,
		version: Option<&str>,
	) -> Result<Vec<Association>>;
	async fn get_active(&self, project_id: &ProjectId) -> Result<Option<Association>>;
	/// Make `id` the only active association of the project. `false` if unknown.
	async fn set_active(&self, project_id: &ProjectId, id: AssociationId) -> Result<bool>;
	async fn delete_association(&self, project_id: &ProjectId, id: AssociationId) -> Result<bool>;
	/// Number of associations of the project pointing at an upload.
	async fn count_references(
		&self,
		project_id: &ProjectId,
		kind: ArtifactKind,
		version: &str,
	) -> Result<u64>;
}

/// SQLite implementation of the association repository.
#[derive(Clone)]
pub struct SqliteAssociationRepository {
	pool: SqlitePool,
}

impl SqliteAssociationRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Open a pool for `database_url` and run migrations.
	///
	/// In-memory databases live as long as their connection, so they get a
	/// single connection that is never recycled.
	#[instrument(skip_all, fields(database_url = %database_url))]
	pub async fn connect(database_url: &str) -> Result<Self> {
		let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
		let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");

		let pool = if in_memory {
			SqlitePoolOptions::new()
				.max_connections(1)
				.min_connections(1)
				.idle_timeout(None)
				.max_lifetime(None)
				.connect_with(options)
				.await?
		} else {
			SqlitePoolOptions::new()
				.max_connections(5)
				.connect_with(options)
				.await?
		};

		let repo = Self::new(pool);
		repo.migrate().await?;
		Ok(repo)
	}

	pub async fn migrate(&self) -> Result<()> {
		for statement in MIGRATIONS {
			sqlx::query(statement).execute(&self.pool).await?;
		}
		debug!("sourcemap association schema ready");
		Ok(())
	}

	pub fn pool(&self) -> &SqlitePool {
		&self.pool
	}
}

#[async_trait]
impl AssociationRepository for SqliteAssociationRepository {
	#[instrument(skip(self, association), fields(association_id = %association.id, project_id = %association.project_id))]
	async fn create_association(&self, association: &Association) -> Result<()> {
		let validation_json = serde_json::to_string(&association.validation)?;

		sqlx::query(
			r#"
			INSERT INTO sourcemap_associations (
				id, project_id, version, source_version_ref, sourcemap_version_ref,
				is_active, validation, created_at
			)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(association.id.to_string())
		.bind(association.project_id.as_str())
		.bind(&association.version)
		.bind(&association.source_version_ref)
		.bind(&association.sourcemap_version_ref)
		.bind(association.is_active)
		.bind(validation_json)
		.bind(association.created_at.to_rfc3339())
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[instrument(skip(self), fields(project_id = %project_id, association_id = %id))]
	async fn get_association(
		&self,
		project_id: &ProjectId,
		id: AssociationId,
	) -> Result<Option<Association>> {
		let row = sqlx::query_as::<_, AssociationRow>(
			r#"
			SELECT id, project_id, version, source_version_ref, sourcemap_version_ref,
				   is_active, validation, created_at
			FROM sourcemap_associations
			WHERE project_id = ? AND id = ?
			"#,
		)
		.bind(project_id.as_str())
		.bind(id.to_string())
		.fetch_optional(&self.pool)
		.await?;

		row.map(Association::try_from).transpose()
	}

	#[instrument(skip(self), fields(project_id = %project_id))]
	async fn list_associations(
		&self,
		project_id: &ProjectId,
		version: Option<&str>,
	) -> Result<Vec<Association>> {
		let rows = sqlx::query_as::<_, AssociationRow>(
			r#"
			SELECT id, project_id, version, source_version_ref, sourcemap_version_ref,
				   is_active, validation, created_at
			FROM sourcemap_associations
			WHERE project_id = ? AND (? IS NULL OR version = ?)
			ORDER BY created_at ASC, id ASC
			"#,
		)
		.bind(project_id.as_str())
		.bind(version)
		.bind(version)
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(Association::try_from).collect()
	}

	#[instrument(skip(self), fields(project_id = %project_id))]
	async fn get_active(&self, project_id: &ProjectId) -> Result<Option<Association>> {
		let row = sqlx::query_as::<_, AssociationRow>(
			r#"
			SELECT id, project_id, version, source_version_ref, sourcemap_version_ref,
				   is_active, validation, created_at
			FROM sourcemap_associations
			WHERE project_id = ? AND is_active = 1
			"#,
		)
		.bind(project_id.as_str())
		.fetch_optional(&self.pool)
		.await?;

		row.map(Association::try_from).transpose()
	}

	#[instrument(skip(self), fields(project_id = %project_id, association_id = %id))]
	async fn set_active(&self, project_id: &ProjectId, id: AssociationId) -> Result<bool> {
		let mut tx = self.pool.begin().await?;

		let exists: i64 = sqlx::query_scalar(
			"SELECT COUNT(*) FROM sourcemap_associations WHERE project_id = ? AND id = ?",
		)
		.bind(project_id.as_str())
		.bind(id.to_string())
		.fetch_one(&mut *tx)
		.await?;
		if exists == 0 {
			tx.rollback().await?;
			return Ok(false);
		}

		sqlx::query(
			"UPDATE sourcemap_associations SET is_active = 0 WHERE project_id = ? AND is_active = 1",
		)
		.bind(project_id.as_str())
		.execute(&mut *tx)
		.await?;

		sqlx::query("UPDATE sourcemap_associations SET is_active = 1 WHERE project_id = ? AND id = ?")
			.bind(project_id.as_str())
			.bind(id.to_string())
			.execute(&mut *tx)
			.await?;

		tx.commit().await?;
		Ok(true)
	}

	#[instrument(skip(self), fields(project_id = %project_id, association_id = %id))]
	async fn delete_association(&self, project_id: &ProjectId, id: AssociationId) -> Result<bool> {
		let result = sqlx::query("DELETE FROM sourcemap_associations WHERE project_id = ? AND id = ?")
			.bind(project_id.as_str())
			.bind(id.to_string())
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected() > 0)
	}

	#[instrument(skip(self), fields(project_id = %project_id, kind = %kind))]
	async fn count_references(
		&self,
		project_id: &ProjectId,
		kind: ArtifactKind,
		version: &str,
	) -> Result<u64> {
		let query = match kind {
			ArtifactKind::Source => {
				"SELECT COUNT(*) FROM sourcemap_associations WHERE project_id = ? AND source_version_ref = ?"
			}
			ArtifactKind::Sourcemap => {
				"SELECT COUNT(*) FROM sourcemap_associations WHERE project_id = ? AND sourcemap_version_ref = ?"
			}
		};
		let count: i64 = sqlx::query_scalar(query)
			.bind(project_id.as_str())
			.bind(version)
			.fetch_one(&self.pool)
			.await?;

		Ok(count as u64)
	}
}

#[derive(Debug, sqlx::FromRow)]
struct AssociationRow {
	id: String,
	project_id: String,
	version: String,
	source_version_ref: String,
	sourcemap_version_ref: String,
	is_active: bool,
	validation: String,
	created_at: String,
}

impl TryFrom<AssociationRow> for Association {
	type Error = SourcemapServerError;

	fn try_from(row: AssociationRow) -> Result<Self> {
		let validation: ValidationReport = serde_json::from_str(&row.validation)?;
		Ok(Association {
			id: AssociationId(row.id.parse()?),
			project_id: ProjectId::new(row.project_id)?,
			version: row.version,
			source_version_ref: row.source_version_ref,
			sourcemap_version_ref: row.sourcemap_version_ref,
			is_active: row.is_active,
			validation,
			created_at: parse_datetime(&row.created_at)?,
		})
	}
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
	DateTime::parse_from_rfc3339(s)
		.map(|dt| dt.with_timezone(&Utc))
		.map_err(|_| SourcemapServerError::InvalidDateTime(s.to_string()))
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	async fn repo() -> SqliteAssociationRepository {
		SqliteAssociationRepository::connect("sqlite::memory:")
			.await
			.expect("Failed to create test pool")
	}

	fn project(id: &str) -> ProjectId {
		ProjectId::new(id).unwrap()
	}

	fn association(project_id: &ProjectId, version: &str) -> Association {
		Association::new(
			project_id.clone(),
			version,
			version,
			version,
			ValidationReport::default(),
		)
	}

	#[tokio::test]
	async fn test_create_and_get() {
		let repo = repo().await;
		let p = project("web");
		let a = association(&p, "1.0.0");
		repo.create_association(&a).await.unwrap();

		let fetched = repo.get_association(&p, a.id).await.unwrap().unwrap();
		assert_eq!(fetched.id, a.id);
		assert_eq!(fetched.version, "1.0.0");
		assert_eq!(fetched.created_at, a.created_at);
		assert!(!fetched.is_active);

		assert!(repo
			.get_association(&project("other"), a.id)
			.await
			.unwrap()
			.is_none());
	}

	#[tokio::test]
	async fn test_list_ordered_and_filtered() {
		let repo = repo().await;
		let p = project("web");
		let first = association(&p, "1");
		let second = association(&p, "2");
		let third = association(&p, "1");
		for a in [&first, &second, &third] {
			repo.create_association(a).await.unwrap();
		}
		repo.create_association(&association(&project("api"), "1"))
			.await
			.unwrap();

		let all = repo.list_associations(&p, None).await.unwrap();
		let ids: Vec<_> = all.iter().map(|a| a.id).collect();
		assert_eq!(ids, vec![first.id, second.id, third.id]);

		let ones = repo.list_associations(&p, Some("1")).await.unwrap();
		assert_eq!(ones.len(), 2);
		assert!(ones.iter().all(|a| a.version == "1"));
	}

	#[tokio::test]
	async fn test_set_active_switches() {
		let repo = repo().await;
		let p = project("web");
		let a1 = association(&p, "1");
		let a2 = association(&p, "2");
		repo.create_association(&a1).await.unwrap();
		repo.create_association(&a2).await.unwrap();

		assert!(repo.set_active(&p, a1.id).await.unwrap());
		assert_eq!(repo.get_active(&p).await.unwrap().unwrap().id, a1.id);

		assert!(repo.set_active(&p, a2.id).await.unwrap());
		assert_eq!(repo.get_active(&p).await.unwrap().unwrap().id, a2.id);
		assert!(!repo.get_association(&p, a1.id).await.unwrap().unwrap().is_active);

		assert!(!repo.set_active(&p, AssociationId::new()).await.unwrap());
		assert_eq!(repo.get_active(&p).await.unwrap().unwrap().id, a2.id);
	}

	#[tokio::test]
	async fn test_unique_index_rejects_second_active() {
		let repo = repo().await;
		let p = project("web");
		let mut a1 = association(&p, "1");
		a1.is_active = true;
		let mut a2 = association(&p, "2");
		a2.is_active = true;
		repo.create_association(&a1).await.unwrap();
		assert!(matches!(
			repo.create_association(&a2).await,
			Err(SourcemapServerError::Database(_))
		));
	}

	#[tokio::test]
	async fn test_delete_and_references() {
		let repo = repo().await;
		let p = project("web");
		let a1 = Association::new(p.clone(), "1", "src-1", "map-1", ValidationReport::default());
		let a2 = Association::new(p.clone(), "2", "src-1", "map-2", ValidationReport::default());
		repo.create_association(&a1).await.unwrap();
		repo.create_association(&a2).await.unwrap();

		assert_eq!(
			repo.count_references(&p, ArtifactKind::Source, "src-1").await.unwrap(),
			2
		);
		assert!(repo.delete_association(&p, a1.id).await.unwrap());
		assert!(!repo.delete_association(&p, a1.id).await.unwrap());
		assert_eq!(
			repo.count_references(&p, ArtifactKind::Source, "src-1").await.unwrap(),
			1
		);
		assert_eq!(
			repo.count_references(&p, ArtifactKind::Sourcemap, "map-1").await.unwrap(),
			0
		);
	}

	#[tokio::test]
	async fn test_file_database_persists() {
		let dir = tempfile::tempdir().unwrap();
		let url = format!("sqlite:{}", dir.path().join("maps.db").display());
		let p = project("web");
		let a = association(&p, "1");
		{
			let repo = SqliteAssociationRepository::connect(&url).await.unwrap();
			repo.create_association(&a).await.unwrap();
			repo.set_active(&p, a.id).await.unwrap();
			repo.pool().close().await;
		}
		let reopened = SqliteAssociationRepository::connect(&url).await.unwrap();
		assert_eq!(reopened.get_active(&p).await.unwrap().unwrap().id, a.id);
	}

	proptest! {
		#![proptest_config(ProptestConfig::with_cases(16))]

		#[test]
		fn at_most_one_active(ops in proptest::collection::vec(0usize..4, 1..12)) {
			let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
			rt.block_on(async {
				let repo = repo().await;
				let p = project("web");
				let mut ids = Vec::new();
				for v in 0..4 {
					let a = association(&p, &v.to_string());
					repo.create_association(&a).await.unwrap();
					ids.push(a.id);
				}
				for op in &ops {
					repo.set_active(&p, ids[*op]).await.unwrap();
					let active: Vec<_> = repo
						.list_associations(&p, None)
						.await
						.unwrap()
						.into_iter()
						.filter(|a| a.is_active)
						.collect();
					assert_eq!(active.len(), 1);
					assert_eq!(active[0].id, ids[*op]);
				}
			});
		}
	}
}
