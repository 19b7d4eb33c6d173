// File-level diff/merge.
//
// `diff_file()` and `merge_file()` read two JPEGs, run the engine on their
// coefficients and write the result. The output is written to a temporary
// file next to the destination and renamed into place only once complete,
// so a failed run never leaves a partial or clobbered output behind.
// `merge_chain_file()` renders one image of an archive by merging every diff
// on its dependency chain onto the chain's root.
// SHA-256 of the written file is computed with the `file-io` feature.

use std::io::Write;
use std::path::{Path, PathBuf};

use log::{info, warn};
use tempfile::NamedTempFile;
use thiserror::Error;

#[cfg(feature = "file-io")]
use sha2::Digest;

use crate::archive::{ArchiveMap, ChainError, MAP_FILE_NAME};
use crate::coeffs::ShapeMismatch;
use crate::engine::{self, BlockReport};
use crate::jpeg::{
    BaselineCodec, CodecOptions, CoefficientCodec, DecodeError, EncodeError, JpegImage,
};

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Statistics returned by `diff_file()`.
#[derive(Debug, Clone)]
pub struct DiffStats {
    /// Base file size in bytes.
    pub base_size: u64,
    /// Modified file size in bytes.
    pub modified_size: u64,
    /// Written diff size in bytes.
    pub diff_size: u64,
    /// Blocks kept per component.
    pub blocks: BlockReport,
    /// SHA-256 of the diff file (if `file-io` feature is enabled).
    pub diff_sha256: Option<[u8; 32]>,
}

/// Statistics returned by `merge_file()`.
#[derive(Debug, Clone)]
pub struct MergeStats {
    /// Base file size in bytes.
    pub base_size: u64,
    /// Diff file size in bytes.
    pub diff_size: u64,
    /// Written output size in bytes.
    pub output_size: u64,
    /// Blocks taken from the diff per component.
    pub blocks: BlockReport,
    /// SHA-256 of the output file (if `file-io` feature is enabled).
    pub output_sha256: Option<[u8; 32]>,
}

/// Statistics returned by `merge_chain_file()`.
#[derive(Debug, Clone)]
pub struct ChainStats {
    /// Ids merged, root first.
    pub chain: Vec<String>,
    /// Total size of every file read from the archive.
    pub input_size: u64,
    /// Written output size in bytes.
    pub output_size: u64,
    /// Blocks taken from each diff, in chain order.
    pub blocks: Vec<BlockReport>,
    /// SHA-256 of the output file (if `file-io` feature is enabled).
    pub output_sha256: Option<[u8; 32]>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error type for file-level operations; every variant names the file.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{}: {source}", path.display())]
    Decode { path: PathBuf, source: DecodeError },

    #[error("cannot encode {}: {source}", path.display())]
    Encode { path: PathBuf, source: EncodeError },

    #[error("{} and {} do not line up: {source}", base.display(), other.display())]
    Shape {
        base: PathBuf,
        other: PathBuf,
        source: ShapeMismatch,
    },

    #[error("{}: {source}", path.display())]
    Map { path: PathBuf, source: ChainError },
}

// ---------------------------------------------------------------------------
// diff_file / merge_file
// ---------------------------------------------------------------------------

/// Write a diff of `modified_path` against `base_path` to `diff_path`.
pub fn diff_file(
    base_path: &Path,
    modified_path: &Path,
    diff_path: &Path,
    opts: CodecOptions,
) -> Result<DiffStats, Error> {
    diff_file_with(
        &BaselineCodec::new(opts),
        base_path,
        modified_path,
        diff_path,
    )
}

/// [`diff_file`] with any codec.
pub fn diff_file_with<C: CoefficientCodec>(
    codec: &C,
    base_path: &Path,
    modified_path: &Path,
    diff_path: &Path,
) -> Result<DiffStats, Error> {
    let (base, base_size) = read_image(codec, base_path)?;
    let (modified, modified_size) = read_image(codec, modified_path)?;

    // The diff keeps the modified image's header and metadata.
    let (header, modified) = modified.into_parts();
    let (coefficients, blocks) =
        engine::diff_with_report(base.coefficients(), modified).map_err(|source| {
            Error::Shape {
                base: base_path.to_path_buf(),
                other: modified_path.to_path_buf(),
                source,
            }
        })?;

    let out = JpegImage::from_parts(header, coefficients);
    let (diff_size, diff_sha256) = write_image(codec, &out, diff_path)?;

    info!(
        "diff: {}/{} blocks changed, {} -> {} bytes",
        blocks.touched_blocks(),
        blocks.total_blocks(),
        modified_size,
        diff_size
    );

    Ok(DiffStats {
        base_size,
        modified_size,
        diff_size,
        blocks,
        diff_sha256,
    })
}

/// Apply the diff at `diff_path` to `base_path`, writing `output_path`.
pub fn merge_file(
    base_path: &Path,
    diff_path: &Path,
    output_path: &Path,
    opts: CodecOptions,
) -> Result<MergeStats, Error> {
    merge_file_with(&BaselineCodec::new(opts), base_path, diff_path, output_path)
}

/// [`merge_file`] with any codec.
pub fn merge_file_with<C: CoefficientCodec>(
    codec: &C,
    base_path: &Path,
    diff_path: &Path,
    output_path: &Path,
) -> Result<MergeStats, Error> {
    let (base, base_size) = read_image(codec, base_path)?;
    let (diff, diff_size) = read_image(codec, diff_path)?;

    // The merged image keeps the base image's header and metadata.
    let (header, base) = base.into_parts();
    let (coefficients, blocks) =
        engine::merge_with_report(base, diff.coefficients()).map_err(|source| Error::Shape {
            base: base_path.to_path_buf(),
            other: diff_path.to_path_buf(),
            source,
        })?;

    let out = JpegImage::from_parts(header, coefficients);
    let (output_size, output_sha256) = write_image(codec, &out, output_path)?;

    info!(
        "merge: {}/{} blocks taken from diff, {} bytes written",
        blocks.touched_blocks(),
        blocks.total_blocks(),
        output_size
    );

    Ok(MergeStats {
        base_size,
        diff_size,
        output_size,
        blocks,
        output_sha256,
    })
}

// ---------------------------------------------------------------------------
// merge_chain_file
// ---------------------------------------------------------------------------

/// Render `id` from an archive, writing `output_path`.
///
/// `archive` is either the archive directory or its map file. File names in
/// the map are resolved against the map's directory.
pub fn merge_chain_file(
    archive: &Path,
    id: &str,
    output_path: &Path,
    opts: CodecOptions,
) -> Result<ChainStats, Error> {
    merge_chain_file_with(&BaselineCodec::new(opts), archive, id, output_path)
}

/// [`merge_chain_file`] with any codec.
pub fn merge_chain_file_with<C: CoefficientCodec>(
    codec: &C,
    archive: &Path,
    id: &str,
    output_path: &Path,
) -> Result<ChainStats, Error> {
    let map_path = if archive.is_dir() {
        archive.join(MAP_FILE_NAME)
    } else {
        archive.to_path_buf()
    };
    let text = std::fs::read_to_string(&map_path).map_err(|source| Error::Read {
        path: map_path.clone(),
        source,
    })?;
    let links = ArchiveMap::from_json(&text)
        .and_then(|map| map.chain(id))
        .map_err(|source| Error::Map {
            path: map_path.clone(),
            source,
        })?;

    let dir = map_path.parent().unwrap_or(Path::new(""));
    let paths: Vec<PathBuf> = links.iter().map(|l| dir.join(&l.file)).collect();
    for link in &links {
        if let Some(alpha) = &link.alpha {
            warn!("{}: alpha map {alpha} ignored", link.id);
        }
    }

    // A chain always holds at least the requested id.
    let root_path = &paths[0];
    let (root, mut input_size) = read_image(codec, root_path)?;
    let mut diffs = Vec::with_capacity(paths.len() - 1);
    for path in &paths[1..] {
        let (diff, size) = read_image(codec, path)?;
        input_size += size;
        diffs.push(diff.into_coefficients());
    }

    // The rendered image keeps the root's header and metadata.
    let (header, base) = root.into_parts();
    let (coefficients, blocks) =
        engine::merge_chain_with_report(base, &diffs).map_err(|e| Error::Shape {
            base: root_path.clone(),
            other: paths[e.link + 1].clone(),
            source: e.source,
        })?;

    let out = JpegImage::from_parts(header, coefficients);
    let (output_size, output_sha256) = write_image(codec, &out, output_path)?;

    let chain: Vec<String> = links.into_iter().map(|l| l.id).collect();
    info!(
        "render {id}: {} diffs over {}, {} bytes written",
        diffs.len(),
        chain[0],
        output_size
    );

    Ok(ChainStats {
        chain,
        input_size,
        output_size,
        blocks,
        output_sha256,
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_image<C: CoefficientCodec>(codec: &C, path: &Path) -> Result<(JpegImage, u64), Error> {
    let bytes = std::fs::read(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let image = codec.decode(&bytes).map_err(|source| Error::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    info!(
        "{}: {}x{}, {} components, {} bytes",
        path.display(),
        image.width(),
        image.height(),
        image.component_count(),
        bytes.len()
    );
    Ok((image, bytes.len() as u64))
}

fn write_image<C: CoefficientCodec>(
    codec: &C,
    image: &JpegImage,
    path: &Path,
) -> Result<(u64, Option<[u8; 32]>), Error> {
    let bytes = codec.encode(image).map_err(|source| Error::Encode {
        path: path.to_path_buf(),
        source,
    })?;
    write_atomic(path, &bytes).map_err(|source| Error::Write {
        path: path.to_path_buf(),
        source,
    })?;

    #[cfg(feature = "file-io")]
    let sha256 = Some(sha2::Sha256::digest(&bytes).into());
    #[cfg(not(feature = "file-io"))]
    let sha256: Option<[u8; 32]> = None;

    Ok((bytes.len() as u64, sha256))
}

/// Write `bytes` to a temporary file in `path`'s directory, then rename it
/// onto `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Lowercase hex of a digest.
pub fn hex(digest: &[u8]) -> String {
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jpeg::ComponentSpec;
    use tempfile::tempdir;

    fn write_jpeg(path: &Path, image: &JpegImage) {
        let bytes = BaselineCodec::default().encode(image).unwrap();
        std::fs::write(path, bytes).unwrap();
    }

    fn sample(seed: i16) -> JpegImage {
        let mut img = JpegImage::baseline(32, 32, &ComponentSpec::ycbcr(2, 2)).unwrap();
        for plane in img.coefficients_mut().components_mut() {
            let (bt, bw) = plane.block_shape();
            for br in 0..bt {
                for bc in 0..bw {
                    plane.set(br * 8, bc * 8, seed + (br * bw + bc) as i16);
                    plane.set(br * 8 + 1, bc * 8, 3);
                }
            }
        }
        img
    }

    #[test]
    fn diff_merge_file_roundtrip() {
        let dir = tempdir().unwrap();
        let base_path = dir.path().join("base.jpg");
        let modified_path = dir.path().join("modified.jpg");
        let diff_path = dir.path().join("diff.jpg");
        let output_path = dir.path().join("merged.jpg");

        let base = sample(10);
        let mut modified = base.clone();
        modified.coefficients_mut().components_mut()[0].set(9, 17, -7);
        modified.coefficients_mut().components_mut()[2].fill_block(1, 0, 2);
        write_jpeg(&base_path, &base);
        write_jpeg(&modified_path, &modified);

        let d = diff_file(&base_path, &modified_path, &diff_path, CodecOptions::default()).unwrap();
        assert_eq!(d.blocks.touched_blocks(), 2);
        assert_eq!(d.blocks.total_blocks(), 16 + 4 + 4);
        assert_eq!(d.diff_size, std::fs::metadata(&diff_path).unwrap().len());

        let m = merge_file(&base_path, &diff_path, &output_path, CodecOptions::default()).unwrap();
        assert_eq!(m.blocks.touched_blocks(), 2);

        let merged = BaselineCodec::default()
            .decode(&std::fs::read(&output_path).unwrap())
            .unwrap();
        assert_eq!(merged.coefficients(), modified.coefficients());
    }

    #[test]
    fn shape_mismatch_leaves_no_output() {
        let dir = tempdir().unwrap();
        let base_path = dir.path().join("base.jpg");
        let other_path = dir.path().join("other.jpg");
        let diff_path = dir.path().join("diff.jpg");

        write_jpeg(&base_path, &sample(0));
        write_jpeg(
            &other_path,
            &JpegImage::baseline(48, 32, &ComponentSpec::ycbcr(2, 2)).unwrap(),
        );

        let err = diff_file(&base_path, &other_path, &diff_path, CodecOptions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Shape {
                source: ShapeMismatch::Dimensions { component: 0, .. },
                ..
            }
        ));
        assert!(!diff_path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn failed_write_keeps_existing_output() {
        let dir = tempdir().unwrap();
        let base_path = dir.path().join("base.jpg");
        let diff_path = dir.path().join("diff.jpg");
        write_jpeg(&base_path, &sample(0));
        std::fs::write(&diff_path, b"previous").unwrap();

        let missing = dir.path().join("missing.jpg");
        let err = diff_file(&base_path, &missing, &diff_path, CodecOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Read { ref path, .. } if path == &missing));
        assert_eq!(std::fs::read(&diff_path).unwrap(), b"previous");
    }

    #[test]
    fn decode_error_names_the_file() {
        let dir = tempdir().unwrap();
        let base_path = dir.path().join("base.jpg");
        let junk_path = dir.path().join("junk.jpg");
        write_jpeg(&base_path, &sample(0));
        std::fs::write(&junk_path, b"not a jpeg").unwrap();

        let err = merge_file(
            &base_path,
            &junk_path,
            &dir.path().join("out.jpg"),
            CodecOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
        assert!(err.to_string().contains("junk.jpg"));
    }

    fn write_map(dir: &Path, json: &str) -> PathBuf {
        let path = dir.join(MAP_FILE_NAME);
        std::fs::write(&path, json).unwrap();
        path
    }

    /// v1 -> v2 -> v3, stored as v1.jpg plus two diffs.
    fn three_version_archive(dir: &Path) -> JpegImage {
        let v1 = sample(20);
        let mut v2 = v1.clone();
        v2.coefficients_mut().components_mut()[0].fill_block(3, 3, 5);
        let mut v3 = v2.clone();
        v3.coefficients_mut().components_mut()[0].fill_block(3, 3, -1);
        v3.coefficients_mut().components_mut()[1].set(4, 4, 9);

        write_jpeg(&dir.join("v1.jpg"), &v1);
        write_jpeg(&dir.join("v2.jpg"), &v2);
        write_jpeg(&dir.join("v3.jpg"), &v3);
        let opts = CodecOptions::default();
        diff_file(&dir.join("v1.jpg"), &dir.join("v2.jpg"), &dir.join("v2_diff.jpg"), opts).unwrap();
        diff_file(&dir.join("v2.jpg"), &dir.join("v3.jpg"), &dir.join("v3_diff.jpg"), opts).unwrap();
        v3
    }

    #[test]
    fn three_link_chain_renders_newest_version() {
        let dir = tempdir().unwrap();
        let v3 = three_version_archive(dir.path());
        write_map(
            dir.path(),
            r#"{
                "image_map": {"v1": "v1.jpg", "v2": "v2_diff.jpg", "v3": "v3_diff.jpg"},
                "dependencies": {"v2": "v1", "v3": "v2"},
                "alpha_map": {"v3": "v3_alpha.png"}
            }"#,
        );

        let output_path = dir.path().join("out.jpg");
        let stats =
            merge_chain_file(dir.path(), "v3", &output_path, CodecOptions::default()).unwrap();
        assert_eq!(stats.chain, vec!["v1", "v2", "v3"]);
        assert_eq!(stats.blocks.len(), 2);
        assert_eq!(stats.blocks[0].touched_blocks(), 1);
        assert_eq!(stats.blocks[1].touched_blocks(), 2);
        assert_eq!(stats.output_size, std::fs::metadata(&output_path).unwrap().len());

        let rendered = BaselineCodec::default()
            .decode(&std::fs::read(&output_path).unwrap())
            .unwrap();
        assert_eq!(rendered.coefficients(), v3.coefficients());

        // The map file itself works as the archive argument; a root renders as-is.
        let root_out = dir.path().join("root.jpg");
        let stats = merge_chain_file(
            &dir.path().join(MAP_FILE_NAME),
            "v1",
            &root_out,
            CodecOptions::default(),
        )
        .unwrap();
        assert_eq!(stats.chain, vec!["v1"]);
        assert!(stats.blocks.is_empty());
    }

    #[test]
    fn cycle_fails_without_output() {
        let dir = tempdir().unwrap();
        three_version_archive(dir.path());
        let map_path = write_map(
            dir.path(),
            r#"{
                "image_map": {"v1": "v1.jpg", "v2": "v2_diff.jpg", "v3": "v3_diff.jpg"},
                "dependencies": {"v1": "v3", "v2": "v1", "v3": "v2"}
            }"#,
        );

        let output_path = dir.path().join("out.jpg");
        let err = merge_chain_file(dir.path(), "v3", &output_path, CodecOptions::default())
            .unwrap_err();
        assert!(matches!(
            &err,
            Error::Map { path, source: ChainError::Cycle { id } } if path == &map_path && id == "v3"
        ));
        assert!(!output_path.exists());
    }

    #[test]
    fn missing_id_fails_without_output() {
        let dir = tempdir().unwrap();
        three_version_archive(dir.path());
        write_map(
            dir.path(),
            r#"{
                "image_map": {"v2": "v2_diff.jpg", "v3": "v3_diff.jpg"},
                "dependencies": {"v2": "v1", "v3": "v2"}
            }"#,
        );

        let output_path = dir.path().join("out.jpg");
        let err = merge_chain_file(dir.path(), "v3", &output_path, CodecOptions::default())
            .unwrap_err();
        assert!(matches!(
            &err,
            Error::Map { source: ChainError::UnknownId { id }, .. } if id == "v1"
        ));
        assert!(err.to_string().contains("could not find filename for ID 'v1'"));
        assert!(!output_path.exists());
    }

    #[test]
    fn chain_link_with_other_shape_names_both_files() {
        let dir = tempdir().unwrap();
        three_version_archive(dir.path());
        write_jpeg(
            &dir.path().join("wide.jpg"),
            &JpegImage::baseline(48, 32, &ComponentSpec::ycbcr(2, 2)).unwrap(),
        );
        write_map(
            dir.path(),
            r#"{
                "image_map": {"v1": "v1.jpg", "v2": "v2_diff.jpg", "w": "wide.jpg"},
                "dependencies": {"v2": "v1", "w": "v2"}
            }"#,
        );

        let output_path = dir.path().join("out.jpg");
        let err = merge_chain_file(dir.path(), "w", &output_path, CodecOptions::default())
            .unwrap_err();
        match err {
            Error::Shape { base, other, .. } => {
                assert!(base.ends_with("v1.jpg"));
                assert!(other.ends_with("wide.jpg"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!output_path.exists());
    }

    #[cfg(feature = "file-io")]
    #[test]
    fn sha256_matches_written_file() {
        let dir = tempdir().unwrap();
        let base_path = dir.path().join("base.jpg");
        let diff_path = dir.path().join("diff.jpg");
        write_jpeg(&base_path, &sample(4));

        let d = diff_file(&base_path, &base_path, &diff_path, CodecOptions::default()).unwrap();
        assert_eq!(d.blocks.touched_blocks(), 0);
        let written = std::fs::read(&diff_path).unwrap();
        let expected: [u8; 32] = sha2::Sha256::digest(&written).into();
        assert_eq!(d.diff_sha256, Some(expected));
        assert_eq!(hex(&expected).len(), 64);
    }
}
