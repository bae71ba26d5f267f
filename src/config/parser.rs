use std::{fs, net, path, str};
use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use super::{Error, Network, Result};

fn rangestr(inner: &str, outer: &str) -> Range<usize> {
    let ilen = inner.len();
    let inner = inner.as_ptr() as usize;
    let outer = outer.as_ptr() as usize;
    let offset = inner - outer;
    offset..offset + ilen
}

pub trait TypeName {
    fn type_name() -> String;
}

impl TypeName for bool {
    fn type_name() -> String { "\"true\" or \"false\"".to_owned() }
}

impl TypeName for u64 {
    fn type_name() -> String { format!("a positive integer (and lower than {})", u64::max_value()) }
}

impl TypeName for usize {
    fn type_name() -> String {
        format!("a positive integer (and lower than {})", usize::max_value())
    }
}

impl TypeName for String {
    fn type_name() -> String { "a string".to_owned() }
}

impl TypeName for path::PathBuf {
    fn type_name() -> String { "a path".to_owned() }
}

impl TypeName for net::SocketAddr {
    fn type_name() -> String { "an address like \"127.0.0.1:6667\"".to_owned() }
}

impl TypeName for Network {
    fn type_name() -> String {
        "following the format \"network <name> <host>:<port> [tls]\"".to_owned()
    }
}

impl str::FromStr for Network {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut words = s.split_whitespace();
        let name = words.next().ok_or(())?;
        let address = words.next().ok_or(())?;
        let tls = match words.next() {
            None => false,
            Some("tls") => true,
            Some(_) => return Err(()),
        };
        if words.next().is_some() {
            return Err(());
        }

        let mut split = address.rsplitn(2, ':');
        let port = split.next().ok_or(())?.parse().map_err(|_| ())?;
        let host = split.next().filter(|host| !host.is_empty()).ok_or(())?;
        Ok(Network {
            name: name.to_owned(),
            host: host.trim_start_matches('[').trim_end_matches(']').to_owned(),
            port,
            tls,
        })
    }
}

#[derive(Default, Debug)]
pub struct Parser {
    lines: Vec<String>,
    settings: BTreeMap<usize, Setting>,
    occurences: HashMap<String, Vec<usize>>,
}

#[derive(Debug, Clone)]
pub struct Setting {
    pub lineno: usize,
    pub krange: Range<usize>,
    pub vrange: Range<usize>,
}

impl Parser {
    pub fn read<P>(path: P) -> Result<Self>
        where P: AsRef<path::Path>
    {
        Self::parse(&fs::read_to_string(path)?)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let lines = contents.lines().map(str::to_owned).collect();
        let mut res = Self { lines, ..Self::default() };

        for (lineno, line) in res.lines.iter().enumerate() {
            let mut split = line.trim().splitn(2, ' ').map(str::trim).filter(|s| !s.is_empty());

            let key = if let Some(key) = split.next() {key} else {continue};
            if key.starts_with('#') { continue; }
            let krange = rangestr(key, line);

            let value = if let Some(value) = split.next() {
                value
            } else {
                return Err(res.error(lineno, krange, "this setting has no value"));
            };
            let vrange = rangestr(value, line);

            res.settings.insert(lineno, Setting { lineno, krange, vrange });
            res.occurences.entry(key.to_owned()).or_default().push(lineno);
        }

        Ok(res)
    }

    pub fn unique_setting<S, F>(mut self, key: &str, required: bool, and_then: F) -> Result<Self>
        where S: str::FromStr + TypeName,
              F: FnOnce(S),
    {
        if let Some(occ) = self.occurences.get(key) {
            let (first, last) = match (occ.first(), occ.last()) {
                (Some(&first), Some(&last)) => (first, last),
                _ => return Err(Error::Format(self, None, 0..0, format!("bad setting {:?}", key))),
            };
            if occ.len() > 1 {
                let setting = &self.settings[&last];
                let krange = setting.krange.clone();
                let msg = format!("{:?} must not appear more than once. Specified at lines {:?}",
                                  key, occ.iter().map(|lno| lno + 1).collect::<Vec<_>>());
                return Err(self.error(last, krange, msg));
            }
            let setting = &self.settings[&first];
            let value = match self.lines[first][setting.vrange.clone()].parse() {
                Ok(value) => value,
                Err(_) => {
                    let msg = format!("this setting must be {}", S::type_name());
                    let vrange = setting.vrange.clone();
                    return Err(self.error(first, vrange, msg));
                }
            };
            and_then(value);
        } else if required {
            return Err(Error::Format(self, None, 0..0, format!("missing setting {:?}", key)));
        }
        self.occurences.remove(key);
        Ok(self)
    }

    pub fn setting<S, F>(mut self, key: &str, required: bool, and_then: F) -> Result<Self>
        where S: str::FromStr + TypeName,
              F: FnOnce(Vec<S>),
    {
        if let Some(occ) = self.occurences.get(key) {
            let mut res = Vec::new();
            for setting in occ.iter().map(|lno| self.settings[lno].clone()) {
                let value = match self.lines[setting.lineno][setting.vrange.clone()].parse() {
                    Ok(value) => value,
                    Err(_) => {
                        let msg = format!("this setting must be {}", S::type_name());
                        return Err(self.error(setting.lineno, setting.vrange, msg));
                    }
                };
                res.push(value);
            }
            and_then(res);
        } else if required {
            return Err(Error::Format(self, None, 0..0, format!("missing setting {:?}", key)));
        }
        self.occurences.remove(key);
        Ok(self)
    }

    pub fn check_unknown_settings(self) -> Result<()> {
        let first = self.occurences.iter()
            .filter_map(|(key, occ)| occ.first().map(|&lineno| (lineno, key.clone())))
            .min();
        if let Some((lineno, key)) = first {
            let krange = self.settings[&lineno].krange.clone();
            let msg = format!("unknown setting {:?}", key);
            return Err(self.error(lineno, krange, msg));
        }
        Ok(())
    }

    pub fn error<S>(self, lineno: usize, col: Range<usize>, msg: S) -> Error
        where S: Into<String>
    {
        Error::Format(self, Some(lineno), col, msg.into())
    }

    pub fn lines(&self) -> impl Iterator<Item=&str> + '_ {
        self.lines.iter().map(String::as_ref)
    }
}
