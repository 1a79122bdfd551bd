use chrono::{DateTime, Utc};
use rusqlite::Connection;
use crate::errors::ScanlineError;
use crate::models::image::{Image, ImageRef};
use super::records::{self, SecondaryKey};
use super::schema::keys;
use super::Database;

pub(crate) fn put_image(conn: &Connection, image: &Image) -> Result<(), ScanlineError> {
    let repository_path = format!("{}/{}", image.registry, image.repository);
    records::put(
        conn,
        &keys::image(&image.digest),
        keys::IMAGE_SK,
        Some(SecondaryKey {
            pk2: keys::image_repository(&repository_path),
            sk2: keys::image_repository_sort(image.tag.as_deref(), &image.digest),
        }),
        image,
        image.expires_at,
    )
}

pub(crate) fn load_image(conn: &Connection, digest: &str) -> Result<Option<Image>, ScanlineError> {
    records::get(conn, &keys::image(digest), keys::IMAGE_SK)
}

impl Database {
    /// Create the image record on first sight of a digest; later calls move
    /// registry, repository and tag without touching identity or history.
    /// `expires_at` refreshes the retention deadline when given.
    pub fn upsert_image(
        &self,
        image: &ImageRef,
        now: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Image, ScanlineError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()
            .map_err(|e| ScanlineError::Database(format!("Failed to begin transaction: {}", e)))?;

        let record = match load_image(&tx, &image.digest)? {
            Some(mut existing) => {
                existing.registry = image.registry.clone();
                existing.repository = image.repository.clone();
                if image.tag.is_some() {
                    existing.tag = image.tag.clone();
                }
                existing.updated_at = now;
                if expires_at.is_some() {
                    existing.expires_at = expires_at;
                }
                existing
            }
            None => {
                let mut created = Image::new(image, now);
                created.expires_at = expires_at;
                created
            }
        };
        put_image(&tx, &record)?;

        tx.commit()
            .map_err(|e| ScanlineError::Database(format!("Failed to commit image: {}", e)))?;
        Ok(record)
    }

    pub fn get_image(&self, digest: &str) -> Result<Option<Image>, ScanlineError> {
        let conn = self.lock()?;
        load_image(&conn, digest)
    }

    /// Images of one repository (`{registry}/{repository}`), via the secondary index.
    pub fn images_by_repository(&self, repository_path: &str) -> Result<Vec<Image>, ScanlineError> {
        let conn = self.lock()?;
        records::query_index(&conn, &keys::image_repository(repository_path))
    }

    pub fn list_images(&self) -> Result<Vec<Image>, ScanlineError> {
        let conn = self.lock()?;
        records::query_prefix(&conn, "image:")
    }

    pub fn mark_image_scanned(&self, digest: &str, at: DateTime<Utc>) -> Result<(), ScanlineError> {
        let conn = self.lock()?;
        let mut image = load_image(&conn, digest)?
            .ok_or_else(|| ScanlineError::NotFound(format!("image {}", digest)))?;
        image.last_scanned_at = Some(at);
        image.updated_at = at;
        put_image(&conn, &image)
    }
}
