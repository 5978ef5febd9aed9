//! Rule-based time expression parsing for English and Chinese text.
//!
//! [`TemporalExtractor::extract`] turns a phrase into one instant;
//! [`TemporalExtractor::extract_time_range`] turns a query into a half-open
//! `[start, end)` window for filtering. Both walk a fixed priority ladder and
//! return `None` instead of guessing. Everything is UTC.

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Months, NaiveDate, NaiveTime, TimeDelta, Utc};
use regex::{Captures, Regex};

const MONTH_NAMES: &str = "january|february|march|april|may|june|july|august|september|\
                           october|november|december|jan|feb|mar|apr|jun|jul|aug|sep|sept|\
                           oct|nov|dec";

static SHARED: LazyLock<TemporalExtractor> = LazyLock::new(TemporalExtractor::new);

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("temporal pattern must compile")
}

fn month_from_name(name: &str) -> Option<u32> {
    let month = match name.trim_end_matches('.').to_lowercase().as_str() {
        "january" | "jan" => 1,
        "february" | "feb" => 2,
        "march" | "mar" => 3,
        "april" | "apr" => 4,
        "may" => 5,
        "june" | "jun" => 6,
        "july" | "jul" => 7,
        "august" | "aug" => 8,
        "september" | "sep" | "sept" => 9,
        "october" | "oct" => 10,
        "november" | "nov" => 11,
        "december" | "dec" => 12,
        _ => return None,
    };
    Some(month)
}

fn chinese_numeral(s: &str) -> Option<u32> {
    let n = match s {
        "一" => 1,
        "二" => 2,
        "三" => 3,
        "四" => 4,
        "五" => 5,
        "六" => 6,
        "七" => 7,
        "八" => 8,
        "九" => 9,
        "十" => 10,
        "十一" => 11,
        "十二" => 12,
        _ => s.parse().ok()?,
    };
    Some(n)
}

/// Month in which each season starts.
fn season_start_month(season: &str) -> Option<u32> {
    match season.to_lowercase().as_str() {
        "spring" | "春天" | "春季" => Some(3),
        "summer" | "夏天" | "夏季" => Some(6),
        "fall" | "autumn" | "秋天" | "秋季" => Some(9),
        "winter" | "冬天" | "冬季" => Some(12),
        _ => None,
    }
}

fn ymd(year: i32, month: u32, day: u32) -> Option<DateTime<Utc>> {
    Some(NaiveDate::from_ymd_opt(year, month, day)?.and_time(NaiveTime::MIN).and_utc())
}

fn start_of_day(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.date_naive().and_time(NaiveTime::MIN).and_utc()
}

fn day_window(base: DateTime<Utc>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let start = start_of_day(base);
    Some((start, start.checked_add_signed(TimeDelta::days(1))?))
}

fn month_window(year: i32, month: u32) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let start = ymd(year, month, 1)?;
    Some((start, start.checked_add_months(Months::new(1))?))
}

fn year_window(year: i32) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    if !(1900..=2100).contains(&year) {
        return None;
    }
    Some((ymd(year, 1, 1)?, ymd(year + 1, 1, 1)?))
}

fn monday_of_week(ts: DateTime<Utc>) -> DateTime<Utc> {
    start_of_day(ts) - TimeDelta::days(ts.weekday().num_days_from_monday() as i64)
}

fn contains_any(text: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| text.contains(n))
}

/// First match of `(\d{1,2})月` / `(十一|..)月` not followed by a digit or `日`.
fn month_not_followed_by_day<'t>(pattern: &Regex, text: &'t str) -> Option<Captures<'t>> {
    pattern.captures_iter(text).find(|caps| {
        let end = caps.get(0).map_or(text.len(), |m| m.end());
        !matches!(text[end..].chars().next(), Some(c) if c.is_ascii_digit() || c == '日')
    })
}

#[derive(Debug, Clone, Copy)]
enum Unit {
    Day,
    Week,
    Month,
    Year,
}

impl Unit {
    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "day" => Some(Self::Day),
            "week" => Some(Self::Week),
            "month" => Some(Self::Month),
            "year" => Some(Self::Year),
            _ => None,
        }
    }
}

/// `reference - n units`, at start of day. Month and year steps clamp the day
/// of month to 28 so the result always exists.
fn subtract_unit(reference: DateTime<Utc>, n: i64, unit: Unit) -> Option<DateTime<Utc>> {
    let result = match unit {
        Unit::Day => reference.checked_sub_signed(TimeDelta::try_days(n)?)?,
        Unit::Week => reference.checked_sub_signed(TimeDelta::try_weeks(n)?)?,
        Unit::Month => {
            let total = reference.year() as i64 * 12 + reference.month0() as i64 - n;
            let year = i32::try_from(total.div_euclid(12)).ok()?;
            let month = total.rem_euclid(12) as u32 + 1;
            return ymd(year, month, reference.day().min(28));
        }
        Unit::Year => {
            let year = i32::try_from(reference.year() as i64 - n).ok()?;
            let day = if reference.month() == 2 { reference.day().min(28) } else { reference.day() };
            return ymd(year, reference.month(), day);
        }
    };
    Some(start_of_day(result))
}

pub struct TemporalExtractor {
    iso_full: Regex,
    iso_date: Regex,
    en_abs_mdy: Regex,
    en_abs_dmy: Regex,
    zh_full: Regex,
    zh_partial: Regex,
    en_season: Regex,
    zh_season: Regex,
    en_quarter: Regex,
    zh_quarter: Regex,
    en_ago: Regex,
    en_last: Regex,
    zh_days_ago: Regex,
    zh_weeks_ago: Regex,
    zh_months_ago: Regex,
    zh_years_ago: Regex,
    zh_last_week: Regex,
    zh_last_month: Regex,
    range_year_zh: Regex,
    range_month_zh: Regex,
    range_month_zh_numeral: Regex,
    range_month_en: Regex,
    range_season_en: Regex,
    range_year_en: Regex,
}

impl Default for TemporalExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl TemporalExtractor {
    pub fn new() -> Self {
        Self {
            iso_full: re(r"(\d{4}-\d{2}-\d{2})[T ](\d{2}:\d{2}(?::\d{2})?)"),
            iso_date: re(r"(\d{4}-\d{2}-\d{2})"),
            en_abs_mdy: re(&format!(
                r"(?i)\b({MONTH_NAMES})\.?\s+(\d{{1,2}})(?:st|nd|rd|th)?,?\s*(\d{{4}})"
            )),
            en_abs_dmy: re(&format!(
                r"(?i)\b(\d{{1,2}})(?:st|nd|rd|th)?\s+(?:of\s+)?({MONTH_NAMES})\.?,?\s*(\d{{4}})"
            )),
            zh_full: re(r"(\d{4})年(\d{1,2})月(\d{1,2})日"),
            zh_partial: re(r"(\d{1,2})月(\d{1,2})日"),
            en_season: re(r"(?i)\b(?:last\s+)?(spring|summer|fall|autumn|winter)\b(?:\s+(\d{4}))?"),
            zh_season: re(r"(?:去年)?(?:的)?(春天|春季|夏天|夏季|秋天|秋季|冬天|冬季)"),
            en_quarter: re(r"(?i)\bQ([1-4])[\s,]*(\d{4})"),
            zh_quarter: re(r"(\d{4})年?第?([一二三四1-4])季度"),
            en_ago: re(r"(?i)(\d+)\s+(day|week|month|year)s?\s+ago"),
            en_last: re(
                r"(?i)\blast\s+(week|month|year|monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b",
            ),
            zh_days_ago: re(r"(\d+)\s*(?:天|日)前"),
            zh_weeks_ago: re(r"(\d+)\s*(?:周|个?星期)前"),
            zh_months_ago: re(r"(\d+)\s*个?月前"),
            zh_years_ago: re(r"(\d+)\s*年前"),
            zh_last_week: re(r"上(?:个?星期|周)"),
            zh_last_month: re(r"上个?月"),
            range_year_zh: re(r"(\d{4})年"),
            range_month_zh: re(r"(\d{1,2})月"),
            range_month_zh_numeral: re(r"(十一|十二|一|二|三|四|五|六|七|八|九|十)月"),
            range_month_en: re(&format!(
                r"(?i)\b(?:in|during|around)\s+({MONTH_NAMES})\b\.?(?:\s+(\d{{4}}))?"
            )),
            range_season_en: re(
                r"(?i)\b(?:(?:in|during|around)\s+)?(?:the\s+)?(spring|summer|fall|autumn|winter)\b(?:\s+(?:of\s+)?(\d{4}))?",
            ),
            range_year_en: re(r"(?i)\b(?:in|during|around)\s+(\d{4})\b"),
        }
    }

    /// Process-wide instance; the patterns are compiled once.
    pub fn shared() -> &'static TemporalExtractor {
        &SHARED
    }

    /// Resolve the first recognizable time expression in `text` to an instant.
    pub fn extract(&self, text: &str, reference: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        if text.trim().is_empty() {
            return None;
        }
        let reference = reference.unwrap_or_else(Utc::now);

        self.try_iso_full(text)
            .or_else(|| self.try_iso_date(text))
            .or_else(|| self.try_en_absolute(text))
            .or_else(|| self.try_zh_full(text))
            .or_else(|| self.try_zh_partial(text, reference))
            .or_else(|| self.try_en_season(text, reference))
            .or_else(|| self.try_zh_season(text, reference))
            .or_else(|| self.try_en_quarter(text))
            .or_else(|| self.try_zh_quarter(text))
            .or_else(|| self.try_en_relative(text, reference))
            .or_else(|| self.try_zh_relative(text, reference))
    }

    fn try_iso_full(&self, text: &str) -> Option<DateTime<Utc>> {
        let caps = self.iso_full.captures(text)?;
        let date = NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d").ok()?;
        let time = NaiveTime::parse_from_str(&caps[2], "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(&caps[2], "%H:%M"))
            .ok()?;
        Some(date.and_time(time).and_utc())
    }

    fn try_iso_date(&self, text: &str) -> Option<DateTime<Utc>> {
        let caps = self.iso_date.captures(text)?;
        let date = NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d").ok()?;
        Some(date.and_time(NaiveTime::MIN).and_utc())
    }

    fn try_en_absolute(&self, text: &str) -> Option<DateTime<Utc>> {
        let mdy = self.en_abs_mdy.captures(text).and_then(|caps| {
            ymd(caps[3].parse().ok()?, month_from_name(&caps[1])?, caps[2].parse().ok()?)
        });
        mdy.or_else(|| {
            let caps = self.en_abs_dmy.captures(text)?;
            ymd(caps[3].parse().ok()?, month_from_name(&caps[2])?, caps[1].parse().ok()?)
        })
    }

    fn try_zh_full(&self, text: &str) -> Option<DateTime<Utc>> {
        let caps = self.zh_full.captures(text)?;
        ymd(caps[1].parse().ok()?, caps[2].parse().ok()?, caps[3].parse().ok()?)
    }

    fn try_zh_partial(&self, text: &str, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let caps = self.zh_partial.captures(text)?;
        ymd(reference.year(), caps[1].parse().ok()?, caps[2].parse().ok()?)
    }

    /// Start of the season; without a year, the most recent start not after `reference`.
    fn season_start(
        month: u32,
        explicit_year: Option<i32>,
        last_year: bool,
        reference: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let year = match explicit_year {
            Some(year) => year,
            None if last_year => reference.year() - 1,
            None => {
                let candidate = ymd(reference.year(), month, 1)?;
                if candidate <= reference {
                    reference.year()
                } else {
                    reference.year() - 1
                }
            }
        };
        ymd(year, month, 1)
    }

    fn try_en_season(&self, text: &str, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let caps = self.en_season.captures(text)?;
        let month = season_start_month(&caps[1])?;
        let year = caps.get(2).and_then(|m| m.as_str().parse().ok());
        let last_year = text.to_lowercase().contains("last");
        Self::season_start(month, year, last_year, reference)
    }

    fn try_zh_season(&self, text: &str, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let caps = self.zh_season.captures(text)?;
        let month = season_start_month(&caps[1])?;
        Self::season_start(month, None, text.contains("去年"), reference)
    }

    fn try_en_quarter(&self, text: &str) -> Option<DateTime<Utc>> {
        let caps = self.en_quarter.captures(text)?;
        let quarter: u32 = caps[1].parse().ok()?;
        ymd(caps[2].parse().ok()?, (quarter - 1) * 3 + 1, 1)
    }

    fn try_zh_quarter(&self, text: &str) -> Option<DateTime<Utc>> {
        let caps = self.zh_quarter.captures(text)?;
        let quarter = chinese_numeral(&caps[2]).filter(|q| (1..=4).contains(q))?;
        ymd(caps[1].parse().ok()?, (quarter - 1) * 3 + 1, 1)
    }

    fn try_en_relative(&self, text: &str, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let lower = text.to_lowercase();

        // longest phrase first: "the day before yesterday" contains "yesterday"
        let word_offsets = [("the day before yesterday", 2), ("yesterday", 1), ("today", 0)];
        for (word, days) in word_offsets {
            if lower.contains(word) {
                return subtract_unit(reference, days, Unit::Day);
            }
        }

        if let Some(caps) = self.en_ago.captures(&lower) {
            return subtract_unit(reference, caps[1].parse().ok()?, Unit::parse(&caps[2])?);
        }

        let caps = self.en_last.captures(&lower)?;
        let unit = &caps[1];
        if let Some(unit) = Unit::parse(unit) {
            return subtract_unit(reference, 1, unit);
        }

        // "last monday" is the monday of the previous week
        let target = ["monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday"]
            .iter()
            .position(|d| *d == unit)? as i64;
        let current = reference.weekday().num_days_from_monday() as i64;
        let mut days_back = (current - target).rem_euclid(7);
        if days_back == 0 {
            days_back = 7;
        }
        subtract_unit(reference, days_back + 7, Unit::Day)
    }

    fn try_zh_relative(&self, text: &str, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let word_offsets = [("大前天", 3), ("前天", 2), ("昨天", 1), ("今天", 0)];
        for (word, days) in word_offsets {
            if text.contains(word) {
                return subtract_unit(reference, days, Unit::Day);
            }
        }

        let counted = [
            (&self.zh_days_ago, Unit::Day),
            (&self.zh_weeks_ago, Unit::Week),
            (&self.zh_months_ago, Unit::Month),
            (&self.zh_years_ago, Unit::Year),
        ];
        for (pattern, unit) in counted {
            if let Some(caps) = pattern.captures(text) {
                return subtract_unit(reference, caps[1].parse().ok()?, unit);
            }
        }

        if self.zh_last_week.is_match(text) {
            return subtract_unit(reference, 1, Unit::Week);
        }
        if self.zh_last_month.is_match(text) {
            return subtract_unit(reference, 1, Unit::Month);
        }
        if text.contains("去年") {
            return subtract_unit(reference, 1, Unit::Year);
        }
        None
    }

    /// Map a query to the `[start, end)` window it talks about.
    ///
    /// Chinese expressions are checked before English ones. Windows that end
    /// "now" (今天, 这周, 最近, ...) use `reference` as their upper bound.
    pub fn extract_time_range(
        &self,
        query: &str,
        reference: Option<DateTime<Utc>>,
    ) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        if query.trim().is_empty() {
            return None;
        }
        let reference = reference.unwrap_or_else(Utc::now);
        let day = |offset: i64| day_window(reference.checked_add_signed(TimeDelta::try_days(offset)?)?);

        if query.contains("大后天") {
            return day(3);
        }
        if query.contains("后天") {
            return day(2);
        }
        if query.contains("明天") {
            return day(1);
        }
        if query.contains("大前天") {
            return day(-3);
        }
        if query.contains("前天") {
            return day(-2);
        }
        if query.contains("昨天") {
            return day(-1);
        }
        if contains_any(query, &["最近", "近期", "近来", "这段时间"]) {
            return Some((reference - TimeDelta::days(30), reference));
        }
        if contains_any(query, &["今天", "今日"]) {
            return Some((start_of_day(reference), reference));
        }
        if contains_any(query, &["这周", "本周", "这个星期", "这个周"]) {
            return Some((monday_of_week(reference), reference));
        }
        if contains_any(query, &["上周", "上个星期", "上个周", "上一周"]) {
            let this_monday = monday_of_week(reference);
            return Some((this_monday - TimeDelta::weeks(1), this_monday));
        }
        if contains_any(query, &["这个月", "这月", "本月"]) {
            return Some((ymd(reference.year(), reference.month(), 1)?, reference));
        }
        if contains_any(query, &["上个月", "上月", "上一个月"]) {
            let first_this = ymd(reference.year(), reference.month(), 1)?;
            return Some((first_this.checked_sub_months(Months::new(1))?, first_this));
        }
        if query.contains("今年") {
            return Some((ymd(reference.year(), 1, 1)?, reference));
        }
        if query.contains("去年") {
            return Some((ymd(reference.year() - 1, 1, 1)?, ymd(reference.year(), 1, 1)?));
        }
        if let Some(caps) = self.range_year_zh.captures(query) {
            if let Some(window) = caps[1].parse().ok().and_then(year_window) {
                return Some(window);
            }
        }
        if let Some(caps) = month_not_followed_by_day(&self.range_month_zh, query) {
            let month: u32 = caps[1].parse().ok()?;
            if (1..=12).contains(&month) {
                return month_window(reference.year(), month);
            }
        }
        if let Some(caps) = month_not_followed_by_day(&self.range_month_zh_numeral, query) {
            return month_window(reference.year(), chinese_numeral(&caps[1])?);
        }

        if let Some(caps) = self.range_month_en.captures(query) {
            let month = month_from_name(&caps[1])?;
            let year = match caps.get(2) {
                Some(y) => y.as_str().parse().ok()?,
                None => reference.year(),
            };
            return month_window(year, month);
        }
        if let Some(caps) = self.range_season_en.captures(query) {
            let start_month = season_start_month(&caps[1])?;
            let year = match caps.get(2) {
                Some(y) => y.as_str().parse().ok()?,
                None => reference.year(),
            };
            let start = ymd(year, start_month, 1)?;
            return Some((start, start.checked_add_months(Months::new(3))?));
        }
        if let Some(caps) = self.range_year_en.captures(query) {
            return year_window(caps[1].parse().ok()?);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn reference() -> Option<DateTime<Utc>> {
        // Thursday
        Some(Utc.with_ymd_and_hms(2023, 6, 15, 14, 30, 0).unwrap())
    }

    fn extract(text: &str) -> Option<DateTime<Utc>> {
        TemporalExtractor::shared().extract(text, reference())
    }

    fn range(query: &str) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        TemporalExtractor::shared().extract_time_range(query, reference())
    }

    #[test]
    fn iso_dates() {
        assert_eq!(extract("2023-05-07"), Some(at(2023, 5, 7)));
        assert_eq!(
            extract("met at 2023-05-07T09:15"),
            Some(Utc.with_ymd_and_hms(2023, 5, 7, 9, 15, 0).unwrap())
        );
        assert_eq!(extract("2023-02-30"), None);
    }

    #[test]
    fn english_absolute() {
        assert_eq!(extract("on May 7, 2023 we moved"), Some(at(2023, 5, 7)));
        assert_eq!(extract("Sept. 3rd 2022"), Some(at(2022, 9, 3)));
        assert_eq!(extract("the 7th of May 2023"), Some(at(2023, 5, 7)));
    }

    #[test]
    fn chinese_absolute() {
        assert_eq!(extract("2023年5月7日去了北京"), Some(at(2023, 5, 7)));
        assert_eq!(extract("5月7日"), Some(at(2023, 5, 7)));
    }

    #[test]
    fn seasons_infer_year() {
        // spring 2023 already started by June
        assert_eq!(extract("this spring"), Some(at(2023, 3, 1)));
        // winter 2023 has not started yet
        assert_eq!(extract("in winter"), Some(at(2022, 12, 1)));
        assert_eq!(extract("last summer"), Some(at(2022, 6, 1)));
        assert_eq!(extract("summer 2019"), Some(at(2019, 6, 1)));
        assert_eq!(extract("去年的秋天"), Some(at(2022, 9, 1)));
    }

    #[test]
    fn quarters() {
        assert_eq!(extract("Q3 2023 results"), Some(at(2023, 7, 1)));
        assert_eq!(extract("2022年第二季度"), Some(at(2022, 4, 1)));
    }

    #[test]
    fn english_relative() {
        assert_eq!(extract("yesterday"), Some(at(2023, 6, 14)));
        assert_eq!(extract("the day before yesterday"), Some(at(2023, 6, 13)));
        assert_eq!(extract("3 days ago"), Some(at(2023, 6, 12)));
        assert_eq!(extract("2 months ago"), Some(at(2023, 4, 15)));
        assert_eq!(extract("last year"), Some(at(2022, 6, 15)));
        // Thursday 15th → previous week's Monday
        assert_eq!(extract("last monday"), Some(at(2023, 6, 5)));
    }

    #[test]
    fn month_arithmetic_clamps_day() {
        let end_of_march = Utc.with_ymd_and_hms(2023, 3, 31, 12, 0, 0).unwrap();
        let result = TemporalExtractor::shared().extract("1 month ago", Some(end_of_march));
        assert_eq!(result, Some(at(2023, 2, 28)));
        let result = TemporalExtractor::shared().extract("14 months ago", Some(end_of_march));
        assert_eq!(result, Some(at(2022, 1, 28)));
    }

    #[test]
    fn chinese_relative() {
        assert_eq!(extract("昨天"), Some(at(2023, 6, 14)));
        assert_eq!(extract("大前天"), Some(at(2023, 6, 12)));
        assert_eq!(extract("3天前"), Some(at(2023, 6, 12)));
        assert_eq!(extract("2个星期前"), Some(at(2023, 6, 1)));
        assert_eq!(extract("去年"), Some(at(2022, 6, 15)));
    }

    #[test]
    fn nothing_recognizable() {
        assert_eq!(extract("I like tea"), None);
        assert_eq!(extract(""), None);
        assert_eq!(extract("99999999999999 days ago"), None);
    }

    #[test]
    fn last_week_range_is_monday_to_monday() {
        assert_eq!(range("上周做了什么"), Some((at(2023, 6, 5), at(2023, 6, 12))));
    }

    #[test]
    fn chinese_day_ranges() {
        assert_eq!(range("昨天"), Some((at(2023, 6, 14), at(2023, 6, 15))));
        assert_eq!(range("明天的安排"), Some((at(2023, 6, 16), at(2023, 6, 17))));
        assert_eq!(range("大后天"), Some((at(2023, 6, 18), at(2023, 6, 19))));
    }

    #[test]
    fn recent_is_trailing_thirty_days() {
        let (start, end) = range("最近怎么样").unwrap();
        assert_eq!(end, reference().unwrap());
        assert_eq!(end - start, TimeDelta::days(30));
    }

    #[test]
    fn chinese_month_and_year_ranges() {
        assert_eq!(range("上个月"), Some((at(2023, 5, 1), at(2023, 6, 1))));
        assert_eq!(range("去年"), Some((at(2022, 1, 1), at(2023, 1, 1))));
        assert_eq!(range("2021年发生了什么"), Some((at(2021, 1, 1), at(2022, 1, 1))));
        assert_eq!(range("在5月发生了什么"), Some((at(2023, 5, 1), at(2023, 6, 1))));
        assert_eq!(range("十二月"), Some((at(2023, 12, 1), at(2024, 1, 1))));
        assert_eq!(range("十一月"), Some((at(2023, 11, 1), at(2023, 12, 1))));
        // a full date is not a month query
        assert_eq!(range("5月7日"), None);
    }

    #[test]
    fn english_ranges() {
        assert_eq!(range("what happened in June"), Some((at(2023, 6, 1), at(2023, 7, 1))));
        assert_eq!(range("during december 2022"), Some((at(2022, 12, 1), at(2023, 1, 1))));
        assert_eq!(range("in the winter of 2022"), Some((at(2022, 12, 1), at(2023, 3, 1))));
        assert_eq!(range("trips during 2019"), Some((at(2019, 1, 1), at(2020, 1, 1))));
        assert_eq!(range("in marching band"), None);
        assert_eq!(range("tell me about tea"), None);
    }
}
