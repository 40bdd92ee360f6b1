//! High-level entry points combining the reader, engine and writer.
//!
//! # Example
//!
//! ```rust,ignore
//! use avails::{pipeline, MappingCatalog, StaticSchema, IngestOptions};
//! use std::path::Path;
//!
//! let catalog = MappingCatalog::builtin()?;
//! let spec = catalog.get("2.3")?;
//! let outcome = pipeline::ingest_path(
//!     Path::new("avails.xlsx"),
//!     None,
//!     &spec,
//!     &StaticSchema::avails(),
//!     IngestOptions::default(),
//! )?;
//! println!("{}", pipeline::render_xml(&outcome)?);
//! ```

use std::path::Path;
use std::sync::Arc;

use super::extract::{ExtractOptions, ExtractOutcome, Extractor};
use super::ingest::{IngestOptions, IngestOutcome, Ingester, RowFlow};
use crate::error::{TranscodeError, TranscodeResult, XmlError};
use crate::mapping::{MappingCatalog, MappingSpec};
use crate::schema::SchemaIntrospection;
use crate::sheet::reader::{self, SheetSource};
use crate::xml::{reader as xml_reader, writer as xml_writer};

// =============================================================================
// Spreadsheet → XML
// =============================================================================

/// Ingest a CSV or XLSX file (`sheet` picks a workbook sheet).
pub fn ingest_path(
    path: &Path,
    sheet: Option<&str>,
    spec: &MappingSpec,
    schema: &dyn SchemaIntrospection,
    options: IngestOptions,
) -> TranscodeResult<IngestOutcome> {
    tracing::info!(path = %path.display(), version = spec.version(), "ingesting spreadsheet");
    let source = reader::open(path, sheet)?;
    ingest_source(source, spec, schema, options)
}

/// Ingest CSV content held in memory.
pub fn ingest_bytes(
    bytes: &[u8],
    spec: &MappingSpec,
    schema: &dyn SchemaIntrospection,
    options: IngestOptions,
) -> TranscodeResult<IngestOutcome> {
    let source = reader::csv_from_bytes("upload", bytes)?;
    ingest_source(source, spec, schema, options)
}

fn ingest_source(
    source: SheetSource,
    spec: &MappingSpec,
    schema: &dyn SchemaIntrospection,
    options: IngestOptions,
) -> TranscodeResult<IngestOutcome> {
    let mut ingester = Ingester::new(spec, schema, options)?;
    for row in source {
        if ingester.push_row(&row?) == RowFlow::Terminated {
            break;
        }
    }
    let outcome = ingester.finish();
    tracing::info!(
        rows = outcome.stats.data_rows,
        failed = outcome.stats.failed,
        avails = outcome.stats.avails,
        "ingestion finished"
    );
    Ok(outcome)
}

/// Serialize an ingested document.
pub fn render_xml(outcome: &IngestOutcome) -> TranscodeResult<String> {
    Ok(xml_writer::to_string(&outcome.document)?)
}

// =============================================================================
// XML → Spreadsheet
// =============================================================================

/// Mapping whose Avails namespace matches the document's root namespace.
pub fn detect_mapping(catalog: &MappingCatalog, xml: &str) -> TranscodeResult<Arc<MappingSpec>> {
    match catalog.detect(xml)? {
        Some(spec) => Ok(spec),
        None => Err(TranscodeError::UndetectedVersion(
            xml_reader::root_namespace(xml)?.unwrap_or_default(),
        )),
    }
}

/// Extract sheets from XML text with a known mapping.
pub fn extract_str(
    xml: &str,
    spec: &MappingSpec,
    schema: &dyn SchemaIntrospection,
    options: ExtractOptions,
) -> TranscodeResult<ExtractOutcome> {
    let doc = xml_reader::parse(xml, spec.bindings())?;
    if doc.root().is_none() {
        return Err(XmlError::NoRoot.into());
    }
    Ok(Extractor::new(spec, schema, options).extract_document(&doc))
}

/// Extract sheets from an XML file, detecting its mapping version.
pub fn extract_path(
    path: &Path,
    catalog: &MappingCatalog,
    schema: &dyn SchemaIntrospection,
    options: ExtractOptions,
) -> TranscodeResult<(Arc<MappingSpec>, ExtractOutcome)> {
    let xml = std::fs::read_to_string(path)?;
    let spec = detect_mapping(catalog, &xml)?;
    tracing::info!(path = %path.display(), version = spec.version(), "extracting avails");
    let outcome = extract_str(&xml, &spec, schema, options)?;
    Ok((spec, outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::StaticSchema;
    use crate::sheet::to_csv_string;
    use crate::xml::{NodeId, XmlDocument};
    use std::io::Write;

    const XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
    <avail:AvailList xmlns:avail="http://www.movielabs.com/schema/avails/v2.3/avails"
            xmlns:md="http://www.movielabs.com/schema/md/v2.6/md">
      <avail:Avail>
        <avail:ALID>md:alid:org:studio:A1</avail:ALID>
        <avail:Disposition><avail:EntryType>Create</avail:EntryType></avail:Disposition>
        <avail:Licensor><md:DisplayName>Studio</md:DisplayName></avail:Licensor>
        <avail:ServiceProvider><md:DisplayName>Shop</md:DisplayName></avail:ServiceProvider>
        <avail:AvailType>single</avail:AvailType>
        <avail:ShortDescription>Spring window</avail:ShortDescription>
        <avail:Asset contentID="md:cid:eidr-s:F00D-0001">
          <avail:WorkType>Movie</avail:WorkType>
          <avail:Metadata>
            <avail:TitleDisplayUnlimited>Feature</avail:TitleDisplayUnlimited>
            <avail:RunLength>PT1H30M</avail:RunLength>
          </avail:Metadata>
        </avail:Asset>
        <avail:Transaction>
          <avail:LicenseType>EST</avail:LicenseType>
          <avail:Territory><md:country>US</md:country></avail:Territory>
          <avail:Territory><md:country>CA</md:country></avail:Territory>
          <avail:Start>2020-01-01T00:00:00</avail:Start>
          <avail:End>2020-12-31T23:59:59</avail:End>
          <avail:Term termName="Tier"><avail:Text>Gold</avail:Text></avail:Term>
        </avail:Transaction>
        <avail:Transaction>
          <avail:LicenseType>VOD</avail:LicenseType>
          <avail:Territory><md:country>FR</md:country></avail:Territory>
          <avail:StartCondition>Immediate</avail:StartCondition>
          <avail:Term termName="SRP"><avail:Money currency="EUR">4.99</avail:Money></avail:Term>
          <avail:Term termName="RentalDuration"><avail:Duration>PT48H</avail:Duration></avail:Term>
        </avail:Transaction>
        <avail:SharedEntitlement ecosystem="UVVU">
          <avail:EcosystemID>UV-1</avail:EcosystemID>
          <avail:EcosystemID>UV-2</avail:EcosystemID>
        </avail:SharedEntitlement>
      </avail:Avail>
      <avail:Avail>
        <avail:ALID>md:alid:org:studio:A2</avail:ALID>
        <avail:Disposition><avail:EntryType>Create</avail:EntryType></avail:Disposition>
        <avail:AvailType>episode</avail:AvailType>
        <avail:Asset contentID="md:cid:org:studio:ep1">
          <avail:WorkType>Episode</avail:WorkType>
          <avail:EpisodeMetadata>
            <avail:EpisodeNumber><md:Number>1</md:Number></avail:EpisodeNumber>
          </avail:EpisodeMetadata>
        </avail:Asset>
        <avail:Transaction>
          <avail:LicenseType>SVOD</avail:LicenseType>
          <avail:Territory><md:country>DE</md:country></avail:Territory>
          <avail:Term termName="EpisodeWSP"><avail:Money currency="EUR">1.49</avail:Money></avail:Term>
        </avail:Transaction>
      </avail:Avail>
    </avail:AvailList>"#;

    /// Order-insensitive rendering of a subtree.
    fn canonical(doc: &XmlDocument, node: NodeId) -> String {
        let mut attributes = doc.attributes(node).to_vec();
        attributes.sort();
        let mut children: Vec<String> = doc.children(node).iter().map(|&c| canonical(doc, c)).collect();
        children.sort();
        format!(
            "<{} {:?}>{}{}</{}>",
            doc.name(node),
            attributes,
            doc.text(node).unwrap_or(""),
            children.concat(),
            doc.name(node)
        )
    }

    fn canonical_text(xml: &str, spec: &MappingSpec) -> String {
        let doc = xml_reader::parse(xml, spec.bindings()).unwrap();
        canonical(&doc, doc.root().unwrap())
    }

    #[test]
    fn test_round_trip_through_csv() {
        crate::logging::init_test();
        let catalog = MappingCatalog::builtin().unwrap();
        let schema = StaticSchema::avails();
        let spec = detect_mapping(&catalog, XML).unwrap();
        assert_eq!(spec.version(), "2.3");

        let extracted = extract_str(XML, &spec, &schema, ExtractOptions::default()).unwrap();
        assert_eq!(extracted.sheets.len(), 1);
        assert_eq!(extracted.sheets[0].rows.len(), 3);

        let csv = to_csv_string(&extracted.sheets[0], b';').unwrap();
        let ingested = ingest_bytes(csv.as_bytes(), &spec, &schema, IngestOptions::default()).unwrap();
        assert!(!ingested.log.has_errors(), "{:?}", ingested.log.entries());
        assert_eq!(ingested.stats.transactions, 3);

        let rebuilt = render_xml(&ingested).unwrap();
        assert_eq!(canonical_text(&rebuilt, &spec), canonical_text(XML, &spec));

        for (address, _) in extracted.provenance.iter() {
            assert!(
                !ingested.provenance.targets_from_row(address.row).is_empty(),
                "no ingested value from row {}",
                address.row
            );
        }
        let first = extracted.provenance.iter().map(|(a, _)| a.row).min();
        assert_eq!(first, Some(crate::sheet::FIRST_DATA_ROW));
    }

    #[test]
    fn test_unknown_namespace_is_undetected() {
        let catalog = MappingCatalog::builtin().unwrap();
        let xml = r#"<a:AvailList xmlns:a="urn:example:avails"/>"#;
        assert!(matches!(
            detect_mapping(&catalog, xml),
            Err(TranscodeError::UndetectedVersion(ns)) if ns == "urn:example:avails"
        ));
    }

    #[test]
    fn test_extract_path_detects_version() {
        let catalog = MappingCatalog::builtin().unwrap();
        let schema = StaticSchema::avails();
        let xml = XML.replace("avails/v2.3", "avails/v2.2").replace("md/v2.6", "md/v2.4");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(xml.as_bytes()).unwrap();

        let (spec, outcome) = extract_path(file.path(), &catalog, &schema, ExtractOptions::default()).unwrap();
        assert_eq!(spec.version(), "2.2");
        let names: Vec<&str> = outcome.sheets.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Movies", "TV"]);
    }

    #[test]
    fn test_ingest_path_reports_sheet_errors() {
        let spec = MappingCatalog::builtin().unwrap().get("2.3").unwrap();
        let schema = StaticSchema::avails();
        let missing = Path::new("/nonexistent/avails.csv");
        assert!(matches!(
            ingest_path(missing, None, &spec, &schema, IngestOptions::default()),
            Err(TranscodeError::Sheet(_))
        ));
    }
}
