//! Static fallback items used when every model attempt failed.
//!
//! Templates are ordinary candidates with their own source passage. They go
//! through the same contract validators as generated candidates, so a
//! fallback item is always contract-valid. Each type rotates through its
//! templates with a process-wide cursor.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use rand::Rng;
use serde_json::{json, Value};
use tracing::warn;

use crate::contracts::{self, ValidationContext};
use crate::items::model::{GeneratorTag, Item, ItemType};

struct FallbackTemplate {
    original: &'static str,
    candidate: Value,
}

pub struct FallbackBank {
    templates: HashMap<ItemType, Vec<FallbackTemplate>>,
    cursors: Mutex<HashMap<ItemType, usize>>,
}

impl Default for FallbackBank {
    fn default() -> Self {
        Self::builtin()
    }
}

impl FallbackBank {
    /// A bank without templates; every request for a fallback fails.
    pub fn empty() -> Self {
        Self {
            templates: HashMap::new(),
            cursors: Mutex::new(HashMap::new()),
        }
    }

    pub fn builtin() -> Self {
        let mut templates = HashMap::new();
        templates.insert(ItemType::Blank, blank_templates());
        templates.insert(ItemType::Vocabulary, vocabulary_templates());
        templates.insert(ItemType::Grammar, grammar_templates());
        templates.insert(ItemType::GrammarMulti, grammar_multi_templates());
        templates.insert(ItemType::Title, title_templates());
        templates.insert(ItemType::Topic, topic_templates());
        Self {
            templates,
            cursors: Mutex::new(HashMap::new()),
        }
    }

    pub fn has_templates(&self, kind: ItemType) -> bool {
        self.templates.get(&kind).is_some_and(|t| !t.is_empty())
    }

    fn advance(&self, kind: ItemType, len: usize) -> usize {
        let mut cursors = self.cursors.lock().unwrap_or_else(PoisonError::into_inner);
        let cursor = cursors.entry(kind).or_insert(0);
        let current = *cursor % len;
        *cursor = (current + 1) % len;
        current
    }

    /// Next template item for `kind`, tagged as a fallback with `reason`.
    ///
    /// A template that fails validation is skipped; `None` when no template
    /// for the type validates.
    pub fn next<R: Rng + ?Sized>(
        &self,
        kind: ItemType,
        reason: &str,
        doc_title: Option<&str>,
        rng: &mut R,
    ) -> Option<Item> {
        let templates = self.templates.get(&kind).filter(|t| !t.is_empty())?;
        for _ in 0..templates.len() {
            let template = &templates[self.advance(kind, templates.len())];
            let ctx = ValidationContext {
                doc_title,
                ..ValidationContext::new(template.original)
            };
            match contracts::normalize(kind, &template.candidate, &ctx, rng) {
                Ok(mut item) => {
                    item.metadata.generator = Some(GeneratorTag::Fallback);
                    item.metadata.model = None;
                    item.metadata.fallback_reason = Some(reason.to_string());
                    return Some(item);
                }
                Err(e) => warn!(item_type = %kind, "Fallback template rejected: {e}"),
            }
        }
        None
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Templates
// ────────────────────────────────────────────────────────────────────────────

const JOURNAL: &str = "Students who keep a reading journal notice steady growth in their \
    confidence over time. Writing a few lines after each chapter forces them to slow down and \
    reflect on what they have read. Over a semester, these small notes turn into a clear \
    record of how their thinking has changed.";

const GARDEN: &str = "Many city gardens began as empty lots that neighbors decided to clean up \
    together. Once vegetables started to grow, residents who had never spoken began sharing \
    tools, seeds and advice. In this way, a patch of soil became a meeting place that \
    strengthened the whole community.";

fn blank_templates() -> Vec<FallbackTemplate> {
    vec![
        FallbackTemplate {
            original: JOURNAL,
            candidate: json!({
                "question": "다음 빈칸에 들어갈 말로 가장 적절한 것은?",
                "questionFamily": "C-1",
                "strategy": "paraphrasing",
                "targetExpression": "a clear record of how their thinking has changed",
                "options": [
                    {"label": "①", "text": "a visible history of their growing understanding"},
                    {"label": "②", "text": "a long list of books they never finished",
                     "fallacy": "off-focus"},
                    {"label": "③", "text": "a strict schedule set by their teachers",
                     "fallacy": "scope-shift"},
                    {"label": "④", "text": "a reason for giving up reading for pleasure",
                     "fallacy": "opposite"},
                    {"label": "⑤", "text": "an exact copy of the novels they read",
                     "fallacy": "too-narrow"}
                ],
                "correctAnswer": 1,
                "explanation": "독서 일지에 남긴 짧은 기록이 학기 동안 쌓여 생각의 변화를 보여 준다는 흐름입니다. \
                    따라서 생각이 자라 온 과정을 눈에 보이게 남긴 기록이라는 선택지가 빈칸에 가장 적절합니다."
            }),
        },
        FallbackTemplate {
            original: GARDEN,
            candidate: json!({
                "question": "다음 빈칸에 들어갈 말로 가장 적절한 것은?",
                "questionFamily": "C-3",
                "strategy": "generalization",
                "targetExpression": "a meeting place that strengthened the whole community",
                "options": [
                    {"label": "①", "text": "a private farm owned by one family",
                     "fallacy": "opposite"},
                    {"label": "②", "text": "a parking area for local shoppers",
                     "fallacy": "off-focus"},
                    {"label": "③", "text": "a shared space that brought neighbors closer"},
                    {"label": "④", "text": "a source of conflict among residents",
                     "fallacy": "opposite"},
                    {"label": "⑤", "text": "a quiet spot where nobody ever visited",
                     "fallacy": "scope-shift"}
                ],
                "correctAnswer": 3,
                "explanation": "서로 말을 나눈 적 없던 주민들이 텃밭을 가꾸며 도구와 조언을 나누게 되었다는 내용입니다. \
                    그러므로 텃밭이 이웃을 더 가깝게 만든 공유 공간이 되었다는 ③이 정답입니다."
            }),
        },
    ]
}

const SLEEP: &str = "Sleep plays a central role in how the brain stores new information. \
    During deep sleep, the brain replays the experiences of the day and strengthens useful \
    connections. Students who stay up late before an exam often remember less than those who \
    rest well. A regular bedtime therefore supports both memory and mood.";

const BEES: &str = "Honeybees communicate through a special movement known as the waggle \
    dance. A returning bee repeats the dance to show where rich flowers can be found. The angle \
    of the dance points the direction, while its length signals the distance. Thanks to this \
    system, the colony can gather food efficiently.";

fn vocabulary_templates() -> Vec<FallbackTemplate> {
    vec![
        FallbackTemplate {
            original: SLEEP,
            candidate: json!({
                "question": "다음 글의 밑줄 친 부분 중, 문맥상 낱말의 쓰임이 적절하지 않은 것은?",
                "passage": SLEEP.replace("strengthens useful connections", "weakens useful connections"),
                "options": [
                    {"label": "①", "text": "plays a central role"},
                    {"label": "②", "text": "replays the experiences"},
                    {"label": "③", "text": "weakens useful connections", "status": "incorrect",
                     "reason": "깊은 잠이 기억을 돕는다는 흐름과 반대되는 표현입니다."},
                    {"label": "④", "text": "remember less"},
                    {"label": "⑤", "text": "supports both memory"}
                ],
                "correctAnswer": 3,
                "corrections": [{"label": "③", "original": "weakens", "replacement": "strengthens"}],
                "explanation": "이 글은 잠이 뇌가 새로운 정보를 저장하는 데 중요한 역할을 한다고 설명합니다. \
                    깊은 잠을 자는 동안 뇌는 하루의 경험을 되짚으며 유용한 연결을 강화하므로 ③의 weakens는 \
                    strengthens로 바뀌어야 글의 흐름과 맞습니다. 나머지 밑줄 친 표현은 잠과 기억의 관계를 \
                    설명하는 문맥에 자연스럽게 어울립니다. 따라서 문맥상 쓰임이 적절하지 않은 것은 ③입니다."
            }),
        },
        FallbackTemplate {
            original: BEES,
            candidate: json!({
                "question": "다음 글의 밑줄 친 부분 중, 문맥상 낱말의 쓰임이 적절하지 않은 것은?",
                "passage": BEES.replace("signals the distance", "hides the distance"),
                "options": [
                    {"label": "①", "text": "communicate through"},
                    {"label": "②", "text": "rich flowers"},
                    {"label": "③", "text": "points the direction"},
                    {"label": "④", "text": "hides the distance", "status": "incorrect",
                     "reason": "춤의 길이는 거리를 알려 주므로 숨긴다는 표현은 부적절합니다."},
                    {"label": "⑤", "text": "gather food efficiently"}
                ],
                "correctAnswer": 4,
                "corrections": [{"label": "④", "original": "hides", "replacement": "signals"}],
                "explanation": "꿀벌은 8자 춤을 통해 먹이가 있는 곳의 방향과 거리를 동료에게 전달합니다. \
                    춤의 각도는 방향을 가리키고 춤의 길이는 거리를 알려 주므로 ④의 hides는 signals로 \
                    바뀌어야 합니다. 나머지 표현은 꿀벌의 의사소통과 먹이 수집이라는 글의 내용과 잘 어울립니다. \
                    따라서 문맥상 낱말의 쓰임이 적절하지 않은 것은 ④입니다."
            }),
        },
    ]
}

const BEACH: &str = "Volunteers who clean the beach every spring have collected tons of \
    plastic. The waste they remove would otherwise harm sea turtles and birds. Many visitors, \
    impressed by their effort, decide to join the next event. Such small actions show that \
    ordinary people can protect nature.";

const MUSEUM: &str = "The museum, which opened last year, attracts thousands of visitors each \
    month. Its exhibits are designed to let children touch and explore. Parents say their kids \
    return home eager to learn more. The staff hopes to expand the building so that more \
    schools can visit.";

fn grammar_templates() -> Vec<FallbackTemplate> {
    vec![FallbackTemplate {
        original: BEACH,
        candidate: json!({
            "question": "다음 글의 밑줄 친 부분 중, 어법상 틀린 것은?",
            "passage": BEACH.replace("decide to join", "decides to join"),
            "options": [
                {"label": "①", "text": "have collected", "status": "correct",
                 "reason": "현재완료 시제로 어법상 맞습니다."},
                {"label": "②", "text": "would otherwise harm", "status": "correct",
                 "reason": "조동사 뒤 동사원형으로 적절합니다."},
                {"label": "③", "text": "impressed by", "status": "correct",
                 "reason": "수동의 의미를 나타내는 과거분사로 옳은 형태입니다."},
                {"label": "④", "text": "decides to join", "status": "incorrect",
                 "reason": "복수 주어 visitors와 수일치 오류가 있습니다."},
                {"label": "⑤", "text": "can protect", "status": "correct",
                 "reason": "조동사 can 뒤 동사원형이 알맞습니다."}
            ],
            "correctAnswer": 4,
            "grammarPoint": "subject-verb agreement",
            "explanation": "④의 주어는 복수 명사 Many visitors이므로 동사는 decide가 되어야 하며 decides는 수일치 오류입니다. \
                ①은 현재완료 시제, ②는 조동사 뒤 동사원형으로 어법상 맞습니다. \
                ③은 분사구문에서 수동의 의미를 나타내는 과거분사이고 ⑤도 조동사 뒤 동사원형입니다. \
                따라서 어법상 틀린 것은 ④입니다."
        }),
    }]
}

fn grammar_multi_templates() -> Vec<FallbackTemplate> {
    vec![FallbackTemplate {
        original: MUSEUM,
        candidate: json!({
            "question": "다음 글의 밑줄 친 부분 중, 어법상 틀린 것을 모두 고르시오.",
            "passage": MUSEUM
                .replace("attracts thousands", "attract thousands")
                .replace("eager to learn", "eager learning"),
            "options": [
                {"label": "①", "text": "which opened", "status": "correct",
                 "reason": "계속적 용법의 관계대명사로 어법상 맞습니다."},
                {"label": "②", "text": "attract thousands", "status": "incorrect",
                 "reason": "단수 주어 The museum과 수일치 오류가 있습니다."},
                {"label": "③", "text": "are designed", "status": "correct",
                 "reason": "복수 주어에 맞는 수동태로 옳은 형태입니다."},
                {"label": "④", "text": "eager learning", "status": "incorrect",
                 "reason": "형용사 eager 뒤에는 to부정사가 와야 하므로 틀린 표현입니다."},
                {"label": "⑤", "text": "so that", "status": "correct",
                 "reason": "목적을 나타내는 접속사로 적절합니다."}
            ],
            "correctAnswers": [2, 4],
            "explanation": "②의 주어는 단수 명사 The museum이므로 attracts가 되어야 하며 attract는 수일치 오류입니다. \
                ④는 형용사 eager 뒤에 to부정사가 와야 하므로 eager to learn으로 고쳐야 합니다. \
                ①, ③, ⑤는 관계대명사, 수동태, 목적의 접속사로 모두 어법상 맞습니다. \
                따라서 어법상 틀린 것은 ②와 ④입니다."
        }),
    }]
}

const KINDNESS: &str = "Students at the academy started a kindness wall where classmates post \
    thank-you notes. Every week the wall fills with new messages, and even shy students add a \
    few words. Teachers say the hallway now feels warmer, and small gestures have become part \
    of the school culture.";

const SILENT_READING: &str = "After surveying classmates, the student council introduced a \
    silent reading morning once a week. For twenty minutes, everyone reads a book of their \
    choice before the first class begins. Students report that they start the day calmer and \
    more focused than before.";

fn title_templates() -> Vec<FallbackTemplate> {
    vec![
        FallbackTemplate {
            original: KINDNESS,
            candidate: json!({
                "question": "다음 글의 제목으로 가장 적절한 것은?",
                "options": [
                    {"label": "①", "text": "Small Notes That Make a School Feel Warmer"},
                    {"label": "②", "text": "Why Students Should Spend Less Time in Hallways",
                     "tag": "off-focus"},
                    {"label": "③", "text": "The Strict Rules Behind Every Successful Academy",
                     "tag": "opposite"},
                    {"label": "④", "text": "How Teachers Grade Writing Assignments Fairly",
                     "tag": "scope-shift"},
                    {"label": "⑤", "text": "The Forgotten History of Paper and Ink",
                     "tag": "off-focus"}
                ],
                "correctAnswer": 1,
                "keywords": ["kindness wall", "thank-you notes", "school culture"],
                "explanation": "학생들이 감사 쪽지를 붙이는 친절의 벽 덕분에 학교 분위기가 따뜻해졌다는 내용입니다. \
                    따라서 작은 쪽지가 학교를 더 따뜻하게 만든다는 ①이 제목으로 가장 적절합니다."
            }),
        },
        FallbackTemplate {
            original: SILENT_READING,
            candidate: json!({
                "question": "다음 글의 제목으로 가장 적절한 것은?",
                "options": [
                    {"label": "①", "text": "Why Homework Should Be Banned on Weekends",
                     "tag": "off-focus"},
                    {"label": "②", "text": "The Council Election and Its Surprising Winner",
                     "tag": "too-narrow"},
                    {"label": "③", "text": "A Quiet Reading Habit That Calms the School Day"},
                    {"label": "④", "text": "How to Choose the Perfect Breakfast Before Class",
                     "tag": "off-focus"},
                    {"label": "⑤", "text": "Libraries Are Losing Readers to Digital Screens",
                     "tag": "opposite"}
                ],
                "correctAnswer": 3,
                "keywords": ["silent reading", "focus"],
                "explanation": "학생회가 도입한 아침 독서 시간 덕분에 학생들이 더 차분하고 집중된 상태로 하루를 시작한다는 글입니다. \
                    그러므로 조용한 독서 습관이 학교의 하루를 차분하게 만든다는 ③이 가장 알맞은 제목입니다."
            }),
        },
    ]
}

const ROBOTICS: &str = "When the robotics team invited members from different grades, \
    collaboration improved quickly. Mentors paired with beginners, and older students learned \
    to explain ideas more clearly. By the end of the season, the team celebrated creative \
    solutions that no single member could have found alone.";

const SHELTER: &str = "A photography class partnered with a local shelter to take adoption \
    portraits of the animals. The students soon noticed that patient lighting and gentle \
    conversation helped each animal relax. The resulting photos were so warm that many of the \
    animals found new homes within a month.";

fn topic_templates() -> Vec<FallbackTemplate> {
    vec![
        FallbackTemplate {
            original: ROBOTICS,
            candidate: json!({
                "question": "다음 글의 주제로 가장 적절한 것은?",
                "options": [
                    {"label": "①", "text": "Competing alone as the best way to build skill",
                     "tag": "opposite"},
                    {"label": "②", "text": "Collaboration across grades that produces creative solutions"},
                    {"label": "③", "text": "The high cost of buying robotics equipment",
                     "tag": "off-focus"},
                    {"label": "④", "text": "Strict rules that older students must follow",
                     "tag": "scope-shift"},
                    {"label": "⑤", "text": "Why beginners should avoid joining school clubs",
                     "tag": "opposite"}
                ],
                "correctAnswer": 2,
                "keywords": ["collaboration", "mentoring"],
                "explanation": "여러 학년의 학생들이 함께 활동하며 서로 가르치고 배운 결과 혼자서는 찾지 못했을 해결책을 얻었다는 내용입니다. \
                    따라서 학년을 넘어선 협력이 창의적인 해결책을 만든다는 ②가 글의 주제입니다."
            }),
        },
        FallbackTemplate {
            original: SHELTER,
            candidate: json!({
                "question": "다음 글의 주제로 가장 적절한 것은?",
                "options": [
                    {"label": "①", "text": "Expensive cameras as the key to better portraits",
                     "tag": "off-focus"},
                    {"label": "②", "text": "The difficulty of training pets for competitions",
                     "tag": "off-focus"},
                    {"label": "③", "text": "Group projects that waste time in school",
                     "tag": "opposite"},
                    {"label": "④", "text": "Careful and patient attention that helps animals find homes"},
                    {"label": "⑤", "text": "Why shelters should close during the winter",
                     "tag": "scope-shift"}
                ],
                "correctAnswer": 4,
                "keywords": ["patience", "adoption portraits"],
                "explanation": "학생들이 인내심 있는 조명과 부드러운 대화로 동물을 편안하게 해 준 덕분에 많은 동물이 새 가족을 찾았다는 글입니다. \
                    그러므로 세심하고 인내심 있는 관심이 동물의 입양을 돕는다는 ④가 주제로 가장 적절합니다."
            }),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::check_item;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_every_type_has_valid_templates() {
        let bank = FallbackBank::builtin();
        let mut rng = StdRng::seed_from_u64(8);
        for kind in ItemType::ALL {
            let count = bank.templates[&kind].len();
            for _ in 0..count {
                let item = bank
                    .next(kind, "generation deadline exceeded", Some("Mock Exam"), &mut rng)
                    .unwrap_or_else(|| panic!("no fallback for {kind}"));
                assert_eq!(item.item_type, kind);
                assert_eq!(item.options.len(), 5);
                assert_eq!(item.metadata.generator, Some(GeneratorTag::Fallback));
                assert_eq!(
                    item.metadata.fallback_reason.as_deref(),
                    Some("generation deadline exceeded")
                );
                assert_eq!(item.source_label, "출처│Mock Exam");
                check_item(&item).unwrap_or_else(|e| panic!("{kind}: {e}"));
            }
        }
    }

    #[test]
    fn test_rotation_cycles_through_templates() {
        let bank = FallbackBank::builtin();
        let mut rng = StdRng::seed_from_u64(1);
        let first = bank.next(ItemType::Title, "x", None, &mut rng).unwrap();
        let second = bank.next(ItemType::Title, "x", None, &mut rng).unwrap();
        let third = bank.next(ItemType::Title, "x", None, &mut rng).unwrap();
        assert_ne!(first.passage, second.passage);
        assert_eq!(first.passage, third.passage);
    }

    #[test]
    fn test_grammar_multi_fallback_answers() {
        let bank = FallbackBank::builtin();
        let item = bank
            .next(ItemType::GrammarMulti, "x", None, &mut StdRng::seed_from_u64(2))
            .unwrap();
        assert_eq!(item.answer, vec![2, 4]);
        assert!(item.passage.contains("②<u>attract thousands</u>"));
    }

    #[test]
    fn test_empty_bank() {
        let bank = FallbackBank::empty();
        assert!(!bank.has_templates(ItemType::Blank));
        assert!(bank
            .next(ItemType::Blank, "x", None, &mut StdRng::seed_from_u64(3))
            .is_none());
    }
}
