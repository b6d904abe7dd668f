//! FITS primary-HDU reading and writing for mask tiles.
//!
//! Only what mask tiles need is supported: a two dimensional primary image
//! (extra axes must have length 1), any standard `BITPIX`, optional
//! `BSCALE`/`BZERO`/`BLANK`, and gzip compression of the whole file.
//! Float and scaled images are reduced to the mask convention on read:
//! NaN, blank and zero become 0, every other value becomes 1.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::trace;

use crate::error::{MaskError, MaskResult};
use crate::projection::{KeywordEntry, KeywordMap, KeywordProvider, Projection, TanProjection};
use crate::source::{OpenTile, TileMetadata, TileSource};
use crate::tile::Raster;

const CARD_SIZE: usize = 80;
const BLOCK_SIZE: usize = 2880;
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
/// Largest NAXIS the FITS standard allows.
const MAX_NAXIS: i64 = 999;

/// Keywords the writer generates itself.
const STRUCTURAL_KEYWORDS: [&str; 6] = ["SIMPLE", "BITPIX", "NAXIS", "NAXIS1", "NAXIS2", "END"];

#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Logical(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

impl HeaderValue {
    pub fn as_real(&self) -> Option<f64> {
        match self {
            Self::Real(v) => Some(*v),
            Self::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_logical(&self) -> Option<bool> {
        match self {
            Self::Logical(b) => Some(*b),
            _ => None,
        }
    }

    fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed == "T" {
            return Self::Logical(true);
        }
        if trimmed == "F" {
            return Self::Logical(false);
        }
        if let Ok(v) = trimmed.parse::<i64>() {
            return Self::Integer(v);
        }
        // Fortran double precision exponents use 'D'.
        let normalised = trimmed.replace(['D', 'd'], "E");
        match normalised.parse::<f64>() {
            Ok(v) => Self::Real(v),
            Err(_) => Self::Text(trimmed.to_string()),
        }
    }
}

/// Keyword values of a primary header, in card order.
#[derive(Debug, Clone, Default)]
pub struct FitsHeader {
    cards: Vec<(String, HeaderValue)>,
    index: HashMap<String, usize>,
}

impl FitsHeader {
    pub fn get(&self, keyword: &str) -> Option<&HeaderValue> {
        self.index.get(keyword).map(|&i| &self.cards[i].1)
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.cards.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn insert(&mut self, keyword: String, value: HeaderValue) {
        match self.index.get(&keyword) {
            Some(&i) => self.cards[i].1 = value,
            None => {
                self.index.insert(keyword.clone(), self.cards.len());
                self.cards.push((keyword, value));
            }
        }
    }

    fn require_int(&self, keyword: &str) -> MaskResult<i64> {
        self.get(keyword)
            .ok_or_else(|| MaskError::fits(format!("missing {} keyword", keyword)))?
            .as_integer()
            .ok_or_else(|| MaskError::fits(format!("{} is not an integer", keyword)))
    }

    /// Reads header blocks until the `END` card.
    pub fn read_from<R: Read>(reader: &mut R) -> MaskResult<Self> {
        let mut header = Self::default();
        let mut block = [0u8; BLOCK_SIZE];
        let mut first = true;

        loop {
            reader
                .read_exact(&mut block)
                .map_err(|e| MaskError::fits(format!("truncated header: {}", e)))?;

            for card in block.chunks_exact(CARD_SIZE) {
                match parse_card(card)? {
                    Card::End => {
                        trace!(cards = header.len(), "parsed FITS header");
                        return Ok(header);
                    }
                    Card::Value(keyword, value) => {
                        if first && (keyword != "SIMPLE" || value.as_logical() != Some(true)) {
                            return Err(MaskError::fits("not a FITS primary header"));
                        }
                        header.insert(keyword, value);
                    }
                    Card::Commentary => {
                        if first {
                            return Err(MaskError::fits("not a FITS primary header"));
                        }
                    }
                }
                first = false;
            }
        }
    }
}

impl KeywordProvider for FitsHeader {
    fn get_string(&self, key: &str) -> Option<String> {
        self.get(key)?.as_text().map(str::to_string)
    }

    fn get_float(&self, key: &str) -> Option<f64> {
        self.get(key)?.as_real()
    }

    fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key)?.as_integer()
    }
}

enum Card {
    End,
    Value(String, HeaderValue),
    Commentary,
}

fn parse_card(card: &[u8]) -> MaskResult<Card> {
    if !card.is_ascii() {
        return Err(MaskError::fits("header contains non-ASCII bytes"));
    }
    // ASCII was checked above, so this cannot fail.
    let text = std::str::from_utf8(card).map_err(|e| MaskError::fits(e.to_string()))?;
    let keyword = text[..8].trim_end();

    if keyword == "END" {
        return Ok(Card::End);
    }
    if &text[8..10] != "= " {
        return Ok(Card::Commentary);
    }

    let field = text[10..].trim_start();
    let value = if let Some(rest) = field.strip_prefix('\'') {
        HeaderValue::Text(parse_quoted(rest)?)
    } else {
        let raw = field.split('/').next().unwrap_or("");
        HeaderValue::parse(raw)
    };
    Ok(Card::Value(keyword.to_string(), value))
}

/// Reads a quoted string body; `''` is an escaped quote. Trailing blanks are
/// not significant.
fn parse_quoted(rest: &str) -> MaskResult<String> {
    let mut out = String::new();
    let mut chars = rest.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\'' {
            if chars.peek() == Some(&'\'') {
                chars.next();
                out.push('\'');
            } else {
                return Ok(out.trim_end().to_string());
            }
        } else {
            out.push(c);
        }
    }
    Err(MaskError::fits("unterminated string value"))
}

/// Sample layout of the primary image.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ImageLayout {
    bitpix: i64,
    nx: usize,
    ny: usize,
    bscale: f64,
    bzero: f64,
    blank: Option<i64>,
    data_len: usize,
}

impl ImageLayout {
    fn from_header(header: &FitsHeader) -> MaskResult<Self> {
        let bitpix = header.require_int("BITPIX")?;
        if !matches!(bitpix, 8 | 16 | 32 | 64 | -32 | -64) {
            return Err(MaskError::fits(format!("unsupported BITPIX {}", bitpix)));
        }

        let naxis = header.require_int("NAXIS")?;
        if naxis < 2 {
            return Err(MaskError::fits(format!(
                "mask tiles need a 2-D image, NAXIS = {}",
                naxis
            )));
        }
        if naxis > MAX_NAXIS {
            return Err(MaskError::fits(format!(
                "NAXIS = {} exceeds the FITS limit of {}",
                naxis, MAX_NAXIS
            )));
        }
        let mut dims = Vec::with_capacity(naxis as usize);
        for axis in 1..=naxis {
            let len = header.require_int(&format!("NAXIS{}", axis))?;
            if len <= 0 {
                return Err(MaskError::fits(format!("NAXIS{} = {} is not positive", axis, len)));
            }
            if axis > 2 && len != 1 {
                return Err(MaskError::fits(format!(
                    "NAXIS{} = {}, only 2-D images are supported",
                    axis, len
                )));
            }
            dims.push(len as usize);
        }

        let (nx, ny) = (dims[0], dims[1]);
        let data_len = nx
            .checked_mul(ny)
            .and_then(|n| n.checked_mul((bitpix.unsigned_abs() / 8) as usize))
            .ok_or_else(|| {
                MaskError::fits(format!("a {}x{} image with BITPIX {} is too large", nx, ny, bitpix))
            })?;

        Ok(Self {
            bitpix,
            nx,
            ny,
            bscale: header.get("BSCALE").and_then(HeaderValue::as_real).unwrap_or(1.0),
            bzero: header.get("BZERO").and_then(HeaderValue::as_real).unwrap_or(0.0),
            blank: header.get("BLANK").and_then(HeaderValue::as_integer),
            data_len,
        })
    }

    #[inline]
    fn bytes_per_sample(&self) -> usize {
        (self.bitpix.unsigned_abs() / 8) as usize
    }

    #[inline]
    fn is_scaled(&self) -> bool {
        self.bscale != 1.0 || self.bzero != 0.0
    }

    fn decode(&self, bytes: &[u8]) -> Vec<i32> {
        let step = self.bytes_per_sample();
        bytes
            .chunks_exact(step)
            .map(|sample| match self.bitpix {
                8 => self.integer_value(i64::from(sample[0])),
                16 => self.integer_value(i64::from(BigEndian::read_i16(sample))),
                32 => self.integer_value(i64::from(BigEndian::read_i32(sample))),
                64 => self.integer_value(BigEndian::read_i64(sample)),
                -32 => mask_flag(self.physical(f64::from(BigEndian::read_f32(sample)))),
                _ => mask_flag(self.physical(BigEndian::read_f64(sample))),
            })
            .collect()
    }

    fn integer_value(&self, raw: i64) -> i32 {
        if self.blank == Some(raw) {
            return 0;
        }
        if self.is_scaled() {
            return mask_flag(self.physical(raw as f64));
        }
        i32::try_from(raw).unwrap_or(1)
    }

    #[inline]
    fn physical(&self, raw: f64) -> f64 {
        raw * self.bscale + self.bzero
    }
}

#[inline]
fn mask_flag(value: f64) -> i32 {
    i32::from(!value.is_nan() && value != 0.0)
}

/// A mask tile file opened for reading. The header has been parsed; the
/// data unit is read on demand.
pub struct FitsTile {
    path: PathBuf,
    header: FitsHeader,
    layout: ImageLayout,
    /// Parsed once at open; each tile gets its own copy.
    projection: Option<TanProjection>,
    reader: Box<dyn Read>,
}

impl FitsTile {
    pub fn open(path: &Path) -> MaskResult<Self> {
        let file = File::open(path).map_err(|e| MaskError::io(path, e))?;
        let mut buffered = BufReader::new(file);
        let magic = buffered.fill_buf().map_err(|e| MaskError::io(path, e))?;
        let gzipped = magic.starts_with(&GZIP_MAGIC) || has_gz_suffix(path);

        let mut reader: Box<dyn Read> = if gzipped {
            Box::new(GzDecoder::new(buffered))
        } else {
            Box::new(buffered)
        };

        let header = FitsHeader::read_from(&mut reader).map_err(|e| with_path(path, e))?;
        let layout = ImageLayout::from_header(&header).map_err(|e| with_path(path, e))?;
        let projection = TanProjection::from_keywords(&header).ok();
        trace!(
            path = %path.display(),
            gzipped,
            ?layout,
            has_wcs = projection.is_some(),
            "opened FITS tile"
        );

        Ok(Self {
            path: path.to_path_buf(),
            header,
            layout,
            projection,
            reader,
        })
    }

    pub fn header(&self) -> &FitsHeader {
        &self.header
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.layout.nx, self.layout.ny)
    }
}

impl OpenTile for FitsTile {
    fn metadata(&self) -> MaskResult<TileMetadata> {
        let projection: Box<dyn Projection> = match &self.projection {
            Some(projection) => projection.boxed_clone(),
            // Parse again to report why the WCS is unusable.
            None => Box::new(TanProjection::from_keywords(&self.header)?),
        };
        Ok(TileMetadata {
            nx: self.layout.nx,
            ny: self.layout.ny,
            projection,
        })
    }

    fn raster(&mut self, nx: usize, ny: usize) -> MaskResult<Raster> {
        if (nx, ny) != self.dimensions() {
            return Err(MaskError::invalid_tile(
                &self.path,
                format!(
                    "requested {}x{} raster from a {}x{} image",
                    nx, ny, self.layout.nx, self.layout.ny
                ),
            ));
        }

        // Sized by the bytes present, not by the header.
        let mut bytes = Vec::new();
        self.reader
            .by_ref()
            .take(self.layout.data_len as u64)
            .read_to_end(&mut bytes)
            .map_err(|e| with_path(&self.path, MaskError::fits(format!("data unit: {}", e))))?;
        if bytes.len() != self.layout.data_len {
            return Err(with_path(
                &self.path,
                MaskError::fits(format!(
                    "truncated data unit: {} of {} bytes",
                    bytes.len(),
                    self.layout.data_len
                )),
            ));
        }

        Raster::new(nx, ny, self.layout.decode(&bytes))
    }
}

/// Reads mask tiles from FITS files.
#[derive(Debug, Clone, Copy, Default)]
pub struct FitsTileSource;

impl TileSource for FitsTileSource {
    fn open(&self, path: &Path) -> MaskResult<Box<dyn OpenTile>> {
        Ok(Box::new(FitsTile::open(path)?))
    }
}

fn has_gz_suffix(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("gz"))
}

fn with_path(path: &Path, err: MaskError) -> MaskError {
    match err {
        MaskError::Fits { message } => MaskError::invalid_tile(path, message),
        other => other,
    }
}

/// Writes `raster` as a 32-bit integer primary image carrying `keywords`.
pub fn write_mask_fits(
    path: &Path,
    raster: &Raster,
    keywords: &KeywordMap,
    gzip: bool,
) -> MaskResult<()> {
    let mut bytes = Vec::with_capacity(2 * BLOCK_SIZE + raster.data().len() * 4);

    push_card(&mut bytes, "SIMPLE", &format!("{:>20}", "T"))?;
    push_card(&mut bytes, "BITPIX", &format!("{:>20}", 32))?;
    push_card(&mut bytes, "NAXIS", &format!("{:>20}", 2))?;
    push_card(&mut bytes, "NAXIS1", &format!("{:>20}", raster.nx()))?;
    push_card(&mut bytes, "NAXIS2", &format!("{:>20}", raster.ny()))?;

    let mut entries: Vec<_> = keywords
        .entries()
        .filter(|(k, _)| !STRUCTURAL_KEYWORDS.contains(k))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    for (keyword, entry) in entries {
        push_card(&mut bytes, keyword, &format_value(keyword, entry)?)?;
    }

    let mut end = [b' '; CARD_SIZE];
    end[..3].copy_from_slice(b"END");
    bytes.extend_from_slice(&end);
    pad_to_block(&mut bytes, b' ');

    for &value in raster.data() {
        bytes
            .write_i32::<BigEndian>(value)
            .map_err(|e| MaskError::io(path, e))?;
    }
    pad_to_block(&mut bytes, 0);

    let file = File::create(path).map_err(|e| MaskError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    if gzip {
        let mut encoder = GzEncoder::new(writer, Compression::default());
        encoder.write_all(&bytes).map_err(|e| MaskError::io(path, e))?;
        writer = encoder.finish().map_err(|e| MaskError::io(path, e))?;
    } else {
        writer.write_all(&bytes).map_err(|e| MaskError::io(path, e))?;
    }
    writer.flush().map_err(|e| MaskError::io(path, e))
}

fn format_value(keyword: &str, entry: KeywordEntry<'_>) -> MaskResult<String> {
    match entry {
        KeywordEntry::Int(v) => Ok(format!("{:>20}", v)),
        KeywordEntry::Float(v) => {
            if !v.is_finite() {
                return Err(MaskError::invalid_keyword(keyword, "value is not finite"));
            }
            // Debug output always carries a '.' or an exponent, so it reads back as real.
            Ok(format!("{:>20}", format!("{:?}", v).to_uppercase()))
        }
        KeywordEntry::Str(s) => Ok(format!("'{:<8}'", s.replace('\'', "''"))),
    }
}

fn push_card(bytes: &mut Vec<u8>, keyword: &str, value: &str) -> MaskResult<()> {
    if keyword.is_empty() || keyword.len() > 8 || !keyword.is_ascii() {
        return Err(MaskError::invalid_keyword(keyword, "not a valid FITS keyword"));
    }
    if !value.is_ascii() || value.len() > CARD_SIZE - 10 {
        return Err(MaskError::invalid_keyword(keyword, "value does not fit in one card"));
    }

    let mut card = [b' '; CARD_SIZE];
    card[..keyword.len()].copy_from_slice(keyword.as_bytes());
    card[8..10].copy_from_slice(b"= ");
    card[10..10 + value.len()].copy_from_slice(value.as_bytes());
    bytes.extend_from_slice(&card);
    Ok(())
}

fn pad_to_block(bytes: &mut Vec<u8>, fill: u8) {
    let rem = bytes.len() % BLOCK_SIZE;
    if rem != 0 {
        bytes.resize(bytes.len() + BLOCK_SIZE - rem, fill);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn card(text: &str) -> Vec<u8> {
        let mut c = vec![b' '; CARD_SIZE];
        c[..text.len()].copy_from_slice(text.as_bytes());
        c
    }

    fn header_bytes(cards: &[&str]) -> Vec<u8> {
        let mut bytes: Vec<u8> = cards.iter().flat_map(|c| card(c)).collect();
        bytes.extend(card("END"));
        pad_to_block(&mut bytes, b' ');
        bytes
    }

    fn write_raw(dir: &TempDir, name: &str, cards: &[&str], data: &[u8]) -> PathBuf {
        let mut bytes = header_bytes(cards);
        bytes.extend_from_slice(data);
        pad_to_block(&mut bytes, 0);
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    const WCS_CARDS: [&str; 8] = [
        "CTYPE1  = 'RA---TAN'",
        "CTYPE2  = 'DEC--TAN'",
        "CRPIX1  =                  1.5",
        "CRPIX2  =                  1.0",
        "CRVAL1  =                150.0",
        "CRVAL2  =                -30.0 / reference dec",
        "CDELT1  =         -2.777778D-4",
        "CDELT2  =          2.777778E-4",
    ];

    #[test]
    fn test_parse_card_values() {
        let parse = |text: &str| match parse_card(&card(text)).unwrap() {
            Card::Value(k, v) => (k, v),
            _ => panic!("expected a value card"),
        };
        assert_eq!(parse("SIMPLE  =                    T").1, HeaderValue::Logical(true));
        assert_eq!(parse("NAXIS   =                    2 / axes").1, HeaderValue::Integer(2));
        assert_eq!(parse("CDELT1  =              -1.5D-3").1, HeaderValue::Real(-1.5e-3));
        assert_eq!(
            parse("OBJECT  = 'it''s / here'       / comment").1,
            HeaderValue::Text("it's / here".to_string())
        );
        assert!(matches!(parse_card(&card("COMMENT hello")).unwrap(), Card::Commentary));
        assert!(matches!(parse_card(&card("END")).unwrap(), Card::End));
    }

    #[test]
    fn test_unterminated_string_rejected() {
        assert!(parse_card(&card("OBJECT  = 'oops")).is_err());
    }

    #[test]
    fn test_header_requires_simple_first() {
        let bytes = header_bytes(&["BITPIX  =                    8"]);
        let err = FitsHeader::read_from(&mut Cursor::new(bytes)).unwrap_err();
        assert!(err.to_string().contains("primary"));
    }

    #[test]
    fn test_header_truncated() {
        let bytes = card("SIMPLE  =                    T");
        assert!(FitsHeader::read_from(&mut Cursor::new(bytes)).is_err());
    }

    #[test]
    fn test_header_spanning_blocks() {
        let mut cards = vec!["SIMPLE  =                    T".to_string()];
        for i in 0..40 {
            cards.push(format!("HIERK{:03}= {:>20}", i, i));
        }
        let refs: Vec<&str> = cards.iter().map(String::as_str).collect();
        let bytes = header_bytes(&refs);
        assert_eq!(bytes.len(), 2 * BLOCK_SIZE);
        let header = FitsHeader::read_from(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(header.get_int("HIERK039"), Some(39));
        assert_eq!(header.len(), 41);
    }

    #[test]
    fn test_write_then_open_int32() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mask_-30_150.fits");
        let mut raster = Raster::zeros(4, 3).unwrap();
        raster.set(2, 3, 5);
        let keywords = KeywordMap::tan_tile(4, 3, 150.0, -30.0, 1.0 / 3600.0);
        write_mask_fits(&path, &raster, &keywords, false).unwrap();

        let len = std::fs::metadata(&path).unwrap().len() as usize;
        assert_eq!(len % BLOCK_SIZE, 0);

        let mut tile = FitsTile::open(&path).unwrap();
        assert_eq!(tile.dimensions(), (4, 3));
        let meta = tile.metadata().unwrap();
        let sky = meta
            .projection
            .pixel_to_sky_one(crate::projection::PixelCoord::new(2.5, 2.0))
            .unwrap();
        assert!((sky.ra() - 150.0).abs() < 1e-9);
        assert!((sky.dec() + 30.0).abs() < 1e-9);

        let read = tile.raster(4, 3).unwrap();
        assert_eq!(read, raster);
    }

    #[test]
    fn test_metadata_projection_outlives_reader() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mask_10_20.fits");
        let raster = Raster::zeros(6, 6).unwrap();
        write_mask_fits(&path, &raster, &KeywordMap::tan_tile(6, 6, 20.0, 10.0, 0.01), false)
            .unwrap();

        let tile = FitsTile::open(&path).unwrap();
        let first = tile.metadata().unwrap();
        let second = tile.metadata().unwrap();
        drop(tile);

        let pixel = crate::projection::PixelCoord::new(1.0, 6.0);
        let a = first.projection.pixel_to_sky_one(pixel).unwrap();
        let b = second.projection.pixel_to_sky_one(pixel).unwrap();
        assert_eq!((a.ra(), a.dec()), (b.ra(), b.dec()));
    }

    #[test]
    fn test_write_then_open_gzip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mask_-30_150.fits.gz");
        let mut raster = Raster::zeros(10, 10).unwrap();
        raster.set(5, 5, 1);
        let keywords = KeywordMap::tan_tile(10, 10, 150.0, -30.0, 1.0 / 3600.0);
        write_mask_fits(&path, &raster, &keywords, true).unwrap();

        let head = std::fs::read(&path).unwrap();
        assert_eq!(&head[..2], &GZIP_MAGIC);

        let mut tile = FitsTileSource.open(&path).unwrap();
        let meta = tile.metadata().unwrap();
        assert_eq!((meta.nx, meta.ny), (10, 10));
        assert!(tile.raster(10, 10).unwrap().is_contaminated(5, 5));
    }

    #[test]
    fn test_gzip_detected_by_magic() {
        let dir = TempDir::new().unwrap();
        let gz_path = dir.path().join("a.fits.gz");
        let raster = Raster::zeros(2, 2).unwrap();
        write_mask_fits(&gz_path, &raster, &KeywordMap::tan_tile(2, 2, 1.0, 2.0, 0.1), true)
            .unwrap();
        let plain_name = dir.path().join("a.fits");
        std::fs::rename(&gz_path, &plain_name).unwrap();
        let mut tile = FitsTile::open(&plain_name).unwrap();
        assert_eq!(tile.raster(2, 2).unwrap(), raster);
    }

    #[test]
    fn test_float_and_scaled_images_reduced_to_flags() {
        let dir = TempDir::new().unwrap();
        let mut data = Vec::new();
        for v in [0.0f32, 2.5, f32::NAN, -1.0] {
            data.write_f32::<BigEndian>(v).unwrap();
        }
        let mut cards = vec![
            "SIMPLE  =                    T",
            "BITPIX  =                  -32",
            "NAXIS   =                    2",
            "NAXIS1  =                    2",
            "NAXIS2  =                    2",
        ];
        cards.extend(WCS_CARDS);
        let path = write_raw(&dir, "float.fits", &cards, &data);
        let mut tile = FitsTile::open(&path).unwrap();
        assert_eq!(tile.raster(2, 2).unwrap().data(), &[0, 1, 0, 1]);

        let mut data = Vec::new();
        for v in [-32768i16, 0, 7, -32768] {
            data.write_i16::<BigEndian>(v).unwrap();
        }
        let mut cards = vec![
            "SIMPLE  =                    T",
            "BITPIX  =                   16",
            "NAXIS   =                    2",
            "NAXIS1  =                    2",
            "NAXIS2  =                    2",
            "BZERO   =                32768",
            "BLANK   =                    0",
        ];
        cards.extend(WCS_CARDS);
        let path = write_raw(&dir, "scaled.fits", &cards, &data);
        let mut tile = FitsTile::open(&path).unwrap();
        // -32768 + 32768 = 0 -> clear; BLANK = 0 raw -> clear; 7 -> flagged.
        assert_eq!(tile.raster(2, 2).unwrap().data(), &[0, 0, 1, 0]);
    }

    #[test]
    fn test_byte_image_keeps_values() {
        let dir = TempDir::new().unwrap();
        let mut cards = vec![
            "SIMPLE  =                    T",
            "BITPIX  =                    8",
            "NAXIS   =                    3",
            "NAXIS1  =                    3",
            "NAXIS2  =                    1",
            "NAXIS3  =                    1",
        ];
        cards.extend(WCS_CARDS);
        let path = write_raw(&dir, "bytes.fits", &cards, &[0, 200, 3]);
        let mut tile = FitsTile::open(&path).unwrap();
        assert_eq!(tile.raster(3, 1).unwrap().data(), &[0, 200, 3]);
    }

    #[test]
    fn test_cube_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_raw(
            &dir,
            "cube.fits",
            &[
                "SIMPLE  =                    T",
                "BITPIX  =                    8",
                "NAXIS   =                    3",
                "NAXIS1  =                    2",
                "NAXIS2  =                    2",
                "NAXIS3  =                    2",
            ],
            &[0; 8],
        );
        let err = FitsTile::open(&path).err().unwrap();
        assert!(matches!(err, MaskError::InvalidTile { .. }));
    }

    #[test]
    fn test_absurd_naxis_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_raw(
            &dir,
            "m_-30_150.fits",
            &[
                "SIMPLE  =                    T",
                "BITPIX  =                   16",
                "NAXIS   =  2305843009213693952",
                "NAXIS1  =                    2",
                "NAXIS2  =                    2",
            ],
            &[0; 8],
        );
        let err = FitsTile::open(&path).err().unwrap();
        assert!(matches!(err, MaskError::InvalidTile { .. }));
        assert!(err.to_string().contains("NAXIS"));
    }

    #[test]
    fn test_oversized_image_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_raw(
            &dir,
            "huge.fits",
            &[
                "SIMPLE  =                    T",
                "BITPIX  =                   32",
                "NAXIS   =                    2",
                "NAXIS1  =  9223372036854775807",
                "NAXIS2  =                    4",
            ],
            &[0; 16],
        );
        let err = FitsTile::open(&path).err().unwrap();
        assert!(err.to_string().contains("too large"), "unexpected error: {}", err);
    }

    #[test]
    fn test_large_header_dimensions_with_short_data() {
        let dir = TempDir::new().unwrap();
        let mut cards = vec![
            "SIMPLE  =                    T",
            "BITPIX  =                   32",
            "NAXIS   =                    2",
            "NAXIS1  =               200000",
            "NAXIS2  =               200000",
        ];
        cards.extend(WCS_CARDS);
        let path = write_raw(&dir, "big.fits", &cards, &[0; 16]);
        let mut tile = FitsTile::open(&path).unwrap();
        let err = tile.raster(200_000, 200_000).unwrap_err();
        assert!(err.to_string().contains("truncated"), "unexpected error: {}", err);
    }

    #[test]
    fn test_truncated_data_unit() {
        let dir = TempDir::new().unwrap();
        let mut cards = vec![
            "SIMPLE  =                    T",
            "BITPIX  =                   32",
            "NAXIS   =                    2",
            "NAXIS1  =                 1000",
            "NAXIS2  =                 1000",
        ];
        cards.extend(WCS_CARDS);
        let path = write_raw(&dir, "short.fits", &cards, &[0; 16]);
        let mut tile = FitsTile::open(&path).unwrap();
        assert!(tile.raster(1000, 1000).is_err());
    }

    #[test]
    fn test_raster_dimension_mismatch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("m.fits");
        let raster = Raster::zeros(3, 3).unwrap();
        write_mask_fits(&path, &raster, &KeywordMap::tan_tile(3, 3, 1.0, 1.0, 0.1), false)
            .unwrap();
        let mut tile = FitsTile::open(&path).unwrap();
        assert!(tile.raster(4, 3).is_err());
    }

    #[test]
    fn test_missing_wcs_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = write_raw(
            &dir,
            "nowcs.fits",
            &[
                "SIMPLE  =                    T",
                "BITPIX  =                    8",
                "NAXIS   =                    2",
                "NAXIS1  =                    1",
                "NAXIS2  =                    1",
            ],
            &[0],
        );
        let tile = FitsTile::open(&path).unwrap();
        let err = tile.metadata().unwrap_err();
        assert!(matches!(err, MaskError::MissingKeyword { .. }));
    }

    #[test]
    fn test_open_missing_file() {
        let err = FitsTile::open(Path::new("/nonexistent/mask.fits")).err().unwrap();
        assert!(matches!(err, MaskError::Io { .. }));
    }

    #[test]
    fn test_writer_preserves_float_precision() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p.fits");
        let mut keywords = KeywordMap::tan_tile(2, 2, 123.456789012345, -45.0, 1.0 / 3600.0);
        keywords.set_int("MASKVER", 3).set_string("ORIGIN", "o'brien");
        write_mask_fits(&path, &Raster::zeros(2, 2).unwrap(), &keywords, false).unwrap();

        let tile = FitsTile::open(&path).unwrap();
        let header = tile.header();
        assert_eq!(header.get_float("CRVAL1"), Some(123.456789012345));
        assert_eq!(header.get_float("CD1_1"), Some(-1.0 / 3600.0));
        assert_eq!(header.get_int("MASKVER"), Some(3));
        assert_eq!(header.get_string("ORIGIN").as_deref(), Some("o'brien"));
        assert_eq!(header.get_string("CTYPE1").as_deref(), Some("RA---TAN"));
    }

    #[test]
    fn test_writer_rejects_non_finite() {
        let dir = TempDir::new().unwrap();
        let mut keywords = KeywordMap::new();
        keywords.set_float("BAD", f64::NAN);
        let err = write_mask_fits(
            &dir.path().join("x.fits"),
            &Raster::zeros(1, 1).unwrap(),
            &keywords,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, MaskError::InvalidKeyword { .. }));
    }
}
