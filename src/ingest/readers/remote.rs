//! Assets of another server account
//!
//! Lists the account's assets and hands them on as local assets whose bytes
//! are downloaded when the uploader asks for them.

use std::sync::Arc;

use tracing::info;

use super::{BrowseContext, ReaderOptions, ReaderResult, sort_for_grouping};
use crate::ingest::analyzer::groups::group_assets;
use crate::ingest::asset::{Album, Asset, Content, DateSource};
use crate::ingest::events::EventCode;
use crate::ingest::fsys::FileId;
use crate::ingest::media;
use crate::ingest::server::{AssetQuery, AssetType, ServerClient};

pub struct RemoteReader {
    client: Arc<dyn ServerClient>,
    host: String,
    query: AssetQuery,
    common: Arc<ReaderOptions>,
}

impl RemoteReader {
    pub fn new(client: Arc<dyn ServerClient>, host: impl Into<String>, query: AssetQuery, common: Arc<ReaderOptions>) -> Self {
        Self {
            client,
            host: host.into(),
            query,
            common,
        }
    }

    pub fn name(&self) -> String {
        self.host.clone()
    }

    pub async fn browse(&self, ctx: &BrowseContext) -> ReaderResult<()> {
        let listed = self.client.list_assets(&self.query).await?;
        info!(host = %self.host, assets = listed.len(), "Listed remote assets");

        let mut assets = Vec::with_capacity(listed.len());
        for remote in listed {
            ctx.check_cancelled()?;
            let file = FileId::new(self.host.as_str(), format!("{}/{}", remote.id, remote.original_file_name));

            if let Some(reason) = self.common.extension_rejection(&media::extension(&remote.original_file_name)) {
                ctx.processor.record_asset_discarded_immediately(
                    &file,
                    remote.size,
                    EventCode::DiscoveredDiscarded,
                    reason,
                );
                continue;
            }

            let content = Content::Remote {
                client: self.client.clone(),
                asset_id: remote.id.clone(),
            };
            let mut asset = Asset::new(file, content, remote.size, remote.captured_at);
            if let Some(date) = remote.captured_at {
                asset.capture_date = Some(date);
                asset.date_source = DateSource::Sidecar;
            }
            for album in &remote.albums {
                asset.add_album(Album::named(album.clone()));
            }
            asset.checksum = Some(remote.checksum.clone());
            self.common.add_run_tags(&mut asset);

            let code = match remote.asset_type {
                AssetType::Video => EventCode::DiscoveredVideo,
                AssetType::Image => EventCode::DiscoveredImage,
            };
            ctx.processor.record_asset_discovered(&asset.file, asset.size, code);
            assets.push(asset);
        }

        sort_for_grouping(&mut assets);
        for group in group_assets(assets, self.common.grouping) {
            ctx.emit_async(group).await?;
        }
        Ok(())
    }
}
