use csv::{ReaderBuilder, StringRecord, Trim};
use log::{debug, info};

use std::path::Path;

use crate::errors::*;
use crate::iupac;
use crate::ngs::*;
use crate::record::Side;

const REQUIRED_COLUMNS: [&str; 5] = [
    "experiment",
    "sample",
    "sample_tag",
    "forward_primer",
    "reverse_primer",
];

/// Read a tag-list CSV file into an uncompiled library.
///
/// ```text
/// @param,primer_mismatches,3
/// experiment,sample,sample_tag,forward_primer,reverse_primer,partial
/// wolf,s01,aattaac:gatcgaa,GGGCAATCCTGAGCCAA,CCATTGAGTCTCTGCACC,false
/// ```
///
/// Lines starting with `#` are comments. `@param` rows set matching options,
/// for every marker or, with two trailing primer columns, for one marker.
pub fn read_tag_list(path: impl AsRef<Path>) -> Result<NgsLibrary> {
    let path = path.as_ref();
    let file = path.display().to_string();
    let reader = std::fs::File::open(path).map_err(|e| Error::FileIo {
        file: file.clone(),
        source: Box::new(e),
    })?;
    read_tag_list_from_reader(reader, &file)
}

/// Read a tag-list CSV from any reader. `origin` names it in errors.
pub fn read_tag_list_from_reader(reader: impl std::io::Read, origin: &str) -> Result<NgsLibrary> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .comment(Some(b'#'))
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);

    let mut params = Vec::new();
    let mut rows = Vec::new();
    for row in rdr.records() {
        let row = row.map_err(|source| Error::Csv {
            file: origin.to_owned(),
            source,
        })?;

        match row.get(0) {
            Some("@param") => params.push(row),
            Some(_) => rows.push(row),
            None => (),
        }
    }

    let mut library = NgsLibrary::new();

    // global parameters first, so markers created below inherit them
    let (global, local): (Vec<_>, Vec<_>) = params.into_iter().partition(|p| p.len() < 5);
    for p in &global {
        let (name, value) = param_fields(p, origin)?;
        apply_param(library.defaults_mut(), name, value, origin)?;
    }

    let mut rows = rows.into_iter();
    let header = rows.next().ok_or_else(|| Error::TagConfig {
        context: origin.to_owned(),
        reason: "missing header row".to_owned(),
    })?;
    let columns = Columns::new(&header, origin)?;

    let mut n_pcrs = 0;
    for (i, row) in rows.enumerate() {
        let context = format!("{origin}, row {}", i + 1);
        let field = |c: usize| row.get(c).unwrap_or("");

        let primers = PrimerPair::new(field(columns.forward_primer), field(columns.reverse_primer));
        let tags = parse_sample_tag(field(columns.sample_tag), &context)?;

        let mut pcr = Pcr::new(field(columns.experiment), field(columns.sample));
        if let Some(c) = columns.partial {
            pcr.partial = matches!(
                field(c).to_ascii_lowercase().as_str(),
                "t" | "true" | "1" | "yes"
            );
        }
        for (name, c) in &columns.extras {
            let value = field(*c);
            if !value.is_empty() {
                pcr.annotations
                    .set(name.as_str(), value)
                    .map_err(|e| Error::TagConfig {
                        context: context.clone(),
                        reason: e.to_string(),
                    })?;
            }
        }

        library.add_pcr(primers, tags, pcr)?;
        n_pcrs += 1;
    }

    for p in &local {
        let (name, value) = param_fields(p, origin)?;
        let primers = PrimerPair::new(&p[3], &p[4]);
        if library.marker(&primers).is_none() {
            return Err(Error::TagConfig {
                context: origin.to_owned(),
                reason: format!("@param {name} refers to unknown marker {primers}"),
            });
        }
        apply_param(library.marker_mut(primers).options_mut(), name, value, origin)?;
    }

    info!(
        "Read {} PCR(s) for {} marker(s) from {}",
        n_pcrs,
        library.len(),
        origin
    );
    Ok(library)
}

struct Columns {
    experiment: usize,
    sample: usize,
    sample_tag: usize,
    forward_primer: usize,
    reverse_primer: usize,
    partial: Option<usize>,
    extras: Vec<(String, usize)>,
}

impl Columns {
    fn new(header: &StringRecord, origin: &str) -> Result<Self> {
        let names: Vec<String> = header.iter().map(|h| h.to_ascii_lowercase()).collect();
        let find = |name: &str| names.iter().position(|n| n == name);

        let mut required = [0; REQUIRED_COLUMNS.len()];
        for (slot, name) in required.iter_mut().zip(REQUIRED_COLUMNS) {
            *slot = find(name).ok_or_else(|| Error::TagConfig {
                context: origin.to_owned(),
                reason: format!("missing column \"{name}\""),
            })?;
        }

        let extras = names
            .iter()
            .enumerate()
            .filter(|(_, n)| !n.is_empty() && n.as_str() != "partial")
            .filter(|(_, n)| !REQUIRED_COLUMNS.contains(&n.as_str()))
            .map(|(i, n)| (n.clone(), i))
            .collect();

        let [experiment, sample, sample_tag, forward_primer, reverse_primer] = required;
        Ok(Self {
            experiment,
            sample,
            sample_tag,
            forward_primer,
            reverse_primer,
            partial: find("partial"),
            extras,
        })
    }
}

/// `fwd:rev`, a single tag used on both sides, `-` for no tag.
fn parse_sample_tag(field: &str, context: &str) -> Result<TagPair> {
    let (forward, reverse) = field.split_once(':').unwrap_or((field, field));

    let tag = |t: &str| -> Result<Vec<u8>> {
        let t = t.trim();
        if t == "-" || t.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(c) = t.bytes().find(|&b| !iupac::is_iupac(b)) {
            return Err(Error::TagConfig {
                context: context.to_owned(),
                reason: format!("invalid character '{}' in tag \"{t}\"", c as char),
            });
        }
        Ok(iupac::to_lower(t.as_bytes()))
    };

    Ok(TagPair::new(tag(forward)?, tag(reverse)?))
}

fn param_fields<'r>(p: &'r StringRecord, origin: &str) -> Result<(&'r str, &'r str)> {
    match (p.get(1), p.get(2)) {
        (Some(name), Some(value)) if !name.is_empty() => Ok((name, value)),
        _ => Err(Error::TagConfig {
            context: origin.to_owned(),
            reason: "@param rows need a name and a value".to_owned(),
        }),
    }
}

/// Set one named option on a marker's options.
pub fn apply_param(options: &mut MarkerOptions, name: &str, value: &str, origin: &str) -> Result<()> {
    let sides: &[Side] = match name.split_once('_') {
        Some(("forward", _)) => &[Side::Forward],
        Some(("reverse", _)) => &[Side::Reverse],
        _ => &[Side::Forward, Side::Reverse],
    };
    let key = name
        .strip_prefix("forward_")
        .or_else(|| name.strip_prefix("reverse_"))
        .unwrap_or(name);

    let number = || {
        value.parse::<usize>().map_err(|_| Error::Parse {
            string: value.to_owned(),
            context: format!("@param {name} in {origin}"),
            reason: "expected a non-negative integer",
        })
    };

    for &side in sides {
        let o = options.side_mut(side);
        match key {
            "primer_mismatches" | "mismatches" => o.max_errors = number()?,
            "indels" => o.allows_indels = parse_bool(value, name, origin)?,
            "spacer" => o.spacer = number()?,
            "tag_delimiter" => o.tag_delimiter = parse_delimiter(value),
            "tag_indels" => o.tag_indels = number()?,
            _ => {
                return Err(Error::TagConfig {
                    context: origin.to_owned(),
                    reason: format!("unknown @param \"{name}\""),
                })
            }
        }
    }

    debug!("@param {name}={value} ({origin})");
    Ok(())
}

fn parse_bool(value: &str, name: &str, origin: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "t" | "true" | "1" | "yes" => Ok(true),
        "f" | "false" | "0" | "no" => Ok(false),
        _ => Err(Error::Parse {
            string: value.to_owned(),
            context: format!("@param {name} in {origin}"),
            reason: "expected a boolean",
        }),
    }
}

/// "0" or empty means none; checked when the library is compiled.
fn parse_delimiter(value: &str) -> u8 {
    match value.as_bytes() {
        [] | [b'0'] => 0,
        [b, ..] => *b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TAG_LIST: &str = "\
# a comment
@param,primer_mismatches,3
@param,forward_spacer,1
experiment,sample,sample_tag,forward_primer,reverse_primer,partial,plate
wolf,s01,acgt:tgca,CCTA,GGAT,F,p1
wolf,s02,ACGG,CCTA,GGAT,true,
bird,s03,-:ttga,ccgg,aagt,,p2
@param,reverse_indels,true,CCTA,GGAT
";

    #[test]
    fn test_read_tag_list() {
        let lib = read_tag_list_from_reader(TAG_LIST.as_bytes(), "tags.csv").unwrap();
        assert_eq!(lib.len(), 2);

        let wolf = &lib.markers()[0];
        assert_eq!(wolf.primers(), &PrimerPair::new("ccta", "ggat"));
        assert_eq!(wolf.samples().len(), 2);
        assert_eq!(wolf.options().forward.max_errors, 3);
        assert_eq!(wolf.options().forward.spacer, 1);
        assert_eq!(wolf.options().reverse.spacer, 0);
        assert!(wolf.options().reverse.allows_indels);
        assert!(!wolf.options().forward.allows_indels);

        let s01 = &wolf.samples()[&TagPair::new("acgt", "tgca")];
        assert_eq!(s01.sample, "s01");
        assert!(!s01.partial);
        assert_eq!(s01.annotations.get_str("plate"), Some("p1"));

        let s02 = &wolf.samples()[&TagPair::new("acgg", "acgg")];
        assert!(s02.partial);
        assert!(!s02.annotations.contains("plate"));

        let bird = &lib.markers()[1];
        assert!(!bird.options().reverse.allows_indels);
        assert!(bird.samples().contains_key(&TagPair::new("", "ttga")));
    }

    #[test]
    fn test_missing_column() {
        let csv = "experiment,sample,forward_primer,reverse_primer\nwolf,s01,ccta,ggat\n";
        let err = read_tag_list_from_reader(csv.as_bytes(), "tags.csv").unwrap_err();
        assert!(err.to_string().contains("sample_tag"));
    }

    #[test]
    fn test_bad_tag_and_param() {
        let csv = "experiment,sample,sample_tag,forward_primer,reverse_primer\nwolf,s01,ac!t,ccta,ggat\n";
        assert!(matches!(
            read_tag_list_from_reader(csv.as_bytes(), "tags.csv"),
            Err(Error::TagConfig { .. })
        ));

        let csv = "@param,primer_typos,1\nexperiment,sample,sample_tag,forward_primer,reverse_primer\n";
        assert!(matches!(
            read_tag_list_from_reader(csv.as_bytes(), "tags.csv"),
            Err(Error::TagConfig { .. })
        ));

        let csv = "@param,spacer,x\nexperiment,sample,sample_tag,forward_primer,reverse_primer\n";
        assert!(matches!(
            read_tag_list_from_reader(csv.as_bytes(), "tags.csv"),
            Err(Error::Parse { .. })
        ));
    }

    #[test]
    fn test_unknown_marker_param() {
        let csv = "experiment,sample,sample_tag,forward_primer,reverse_primer\n\
                   wolf,s01,acgt,ccta,ggat\n\
                   @param,spacer,2,aaaa,cccc\n";
        assert!(read_tag_list_from_reader(csv.as_bytes(), "tags.csv").is_err());
    }

    #[test]
    fn test_delimiter_param() {
        let mut options = MarkerOptions::default();
        apply_param(&mut options, "reverse_tag_delimiter", "C", "test").unwrap();
        apply_param(&mut options, "tag_indels", "2", "test").unwrap();
        assert_eq!(options.forward.tag_delimiter, 0);
        assert_eq!(options.reverse.tag_delimiter, b'C');
        assert_eq!(options.forward.tag_indels, 2);
        assert_eq!(options.reverse.tag_indels, 2);
    }

    #[test]
    fn test_from_file_and_compile() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TAG_LIST.as_bytes()).unwrap();

        let mut lib = read_tag_list(file.path()).unwrap();
        lib.compile().unwrap();
        assert!(lib.is_compiled());

        assert!(matches!(
            read_tag_list("/nonexistent/tags.csv"),
            Err(Error::FileIo { .. })
        ));
    }
}
